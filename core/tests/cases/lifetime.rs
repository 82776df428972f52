use std::rc::Rc;

use crate::common::TestHarness;
use queuesim_core::{service_fn, Interrupt, Message, ServiceContext};

#[test]
fn test_lifetime_drops_queued_message() {
    let mut h = TestHarness::new();
    h.add_single_shot("first", 0.0);
    let second = h.add_single_shot("second", 1.0);
    second.message().unwrap().set_property("lifetime", 2.0);
    h.add_server("res0", 1, 5.0, None);
    h.connect(&["first", "res0"]);
    h.connect(&["second", "res0"]);
    h.run_for(20.0);

    assert_eq!(h.served_at("res0"), vec!["first"]);
    let dropped = h.sink.with_event("pipe.default.lifetime");
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].message, "second");
    assert_eq!(dropped[0].time, 3.0);
}

#[test]
fn test_lifetime_interrupts_service() {
    let mut h = TestHarness::new();
    let source = h.add_single_shot("gen0", 0.0);
    source.message().unwrap().set_property("lifetime", 2.0);
    let res = h.add_server("res0", 1, 5.0, None);
    h.connect(&["gen0", "res0"]);
    h.run_for(20.0);

    assert_eq!(h.times("resource.lifetime"), vec![2.0]);
    assert!(h.times("resource.serve").is_empty());
    assert_eq!(res.task_count(), 0);
}

#[test]
fn test_served_message_outlives_its_lifetime_quietly() {
    let mut h = TestHarness::new();
    let source = h.add_single_shot("gen0", 0.0);
    source.message().unwrap().set_property("lifetime", 10.0);
    h.add_server("res0", 1, 1.0, None);
    h.connect(&["gen0", "res0"]);
    h.run_for(50.0);

    assert_eq!(h.times("resource.serve"), vec![1.0]);
    assert!(h.sink.entries().iter().all(|t| !t.event.ends_with("lifetime")));
}

#[test]
fn test_unsubscribed_lifetime_does_not_expire_in_service() {
    let mut h = TestHarness::new();
    let source = h.add_single_shot("gen0", 0.0);
    source.message().unwrap().set_property("lifetime", 1.75);
    let res = h.add_server("res0", 1, 5.0, None);
    res.set_service(Rc::new(service_fn(|cx: ServiceContext, message: Message| async move {
        message.unsubscribe("lifetime").unwrap();
        let delay = cx.random("service").unwrap_or(0.0);
        cx.timeout(delay).await?;
        Ok::<(), Interrupt>(())
    })));
    h.connect(&["gen0", "res0"]);
    h.run_for(20.0);

    assert_eq!(h.times("resource.serve"), vec![5.0]);
    assert!(h.sink.entries().iter().all(|t| !t.event.ends_with("lifetime")));
}
