use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::Value;

use crate::context::{SimContext, WeakContext};
use crate::engine::SimTime;
use crate::error::{SimError, SimResult};
use crate::event::{Event, Payload};
use crate::pipeline::Pipeline;
use crate::random::RandomProcess;
use crate::trace::Timestamp;

/// Where a message currently sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Generator(String),
    Pipe(String),
    Queue { resource: String, queue: String },
    Resource(String),
}

impl Location {
    pub fn resource_id(&self) -> &str {
        match self {
            Location::Generator(id) | Location::Pipe(id) | Location::Resource(id) => id,
            Location::Queue { resource, .. } => resource,
        }
    }
}

/// A message property: either a fixed value or one re-drawn from a random
/// process each time the message is emitted.
#[derive(Clone)]
pub enum Property {
    Static(Value),
    TimeVarying { process: Rc<RefCell<RandomProcess>>, current: Value },
}

impl Property {
    pub fn random(process: RandomProcess) -> Self {
        Property::TimeVarying { process: Rc::new(RefCell::new(process)), current: Value::Null }
    }

    pub fn value(&self) -> &Value {
        match self {
            Property::Static(v) => v,
            Property::TimeVarying { current, .. } => current,
        }
    }

    pub(crate) fn refresh(&mut self, now: SimTime) {
        if let Property::TimeVarying { process, current } = self {
            *current = process.borrow_mut().value(now).map(Value::from).unwrap_or(Value::Null);
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Static(v) => write!(f, "Static({v})"),
            Property::TimeVarying { current, .. } => write!(f, "TimeVarying({current})"),
        }
    }
}

macro_rules! property_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Property {
            fn from(v: $t) -> Self {
                Property::Static(Value::from(v))
            }
        })*
    };
}

property_from!(f64, i64, u64, bool, &str, String, Value);

impl From<RandomProcess> for Property {
    fn from(process: RandomProcess) -> Self {
        Property::random(process)
    }
}

pub type PropertyDict = IndexMap<String, Property>;

pub type SubscriptionCallback = Rc<dyn Fn(&Message, &Payload)>;

#[derive(Clone)]
struct Subscription {
    event: Event,
    disable: Event,
    callback: SubscriptionCallback,
}

struct MessageData {
    uid: u64,
    id: String,
    seq_num: u64,
    generated: SimTime,
    generator: String,
    alive: bool,
    log: bool,
    location: Location,
    properties: PropertyDict,
    subscriptions: IndexMap<String, Subscription>,
    visited: Vec<String>,
    next: Vec<String>,
    resource: String,
    pipeline: Rc<Pipeline>,
}

/// The entity flowing through the network.
///
/// `Message` is a shared handle: clones refer to the same message. Use
/// [`copy`](Message::copy) for an independent duplicate.
#[derive(Clone)]
pub struct Message {
    data: Rc<RefCell<MessageData>>,
    ctx: WeakContext,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.data.borrow();
        f.debug_struct("Message")
            .field("uid", &d.uid)
            .field("id", &d.id)
            .field("seq_num", &d.seq_num)
            .field("alive", &d.alive)
            .field("location", &d.location)
            .finish()
    }
}

impl Message {
    /// A free-standing message not bound to any simulation.
    pub fn new(id: &str) -> Self {
        Self::build(Weak::new(), 0, id)
    }

    pub(crate) fn template(ctx: &SimContext, generator: &str) -> Self {
        Self::build(ctx.downgrade(), ctx.next_uid(), generator)
    }

    fn build(ctx: WeakContext, uid: u64, id: &str) -> Self {
        let data = MessageData {
            uid,
            id: id.to_string(),
            seq_num: 0,
            generated: 0.0,
            generator: id.to_string(),
            alive: false,
            log: true,
            location: Location::Generator(id.to_string()),
            properties: IndexMap::new(),
            subscriptions: IndexMap::new(),
            visited: Vec::new(),
            next: Vec::new(),
            resource: id.to_string(),
            pipeline: Rc::new(Pipeline::default()),
        };
        Self { data: Rc::new(RefCell::new(data)), ctx }
    }

    pub fn ptr_eq(&self, other: &Message) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    pub fn uid(&self) -> u64 {
        self.data.borrow().uid
    }

    pub fn id(&self) -> String {
        self.data.borrow().id.clone()
    }

    pub fn set_id(&self, id: &str) {
        self.data.borrow_mut().id = id.to_string();
    }

    pub fn seq_num(&self) -> u64 {
        self.data.borrow().seq_num
    }

    pub fn generated(&self) -> SimTime {
        self.data.borrow().generated
    }

    pub fn generator(&self) -> String {
        self.data.borrow().generator.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.data.borrow().alive
    }

    pub fn location(&self) -> Location {
        self.data.borrow().location.clone()
    }

    /// Resource the message was last routed to.
    pub fn resource(&self) -> String {
        self.data.borrow().resource.clone()
    }

    pub fn visited(&self) -> Vec<String> {
        self.data.borrow().visited.clone()
    }

    pub fn next(&self) -> Vec<String> {
        self.data.borrow().next.clone()
    }

    pub fn pipeline(&self) -> Rc<Pipeline> {
        self.data.borrow().pipeline.clone()
    }

    pub fn log_enabled(&self) -> bool {
        self.data.borrow().log
    }

    pub fn set_log(&self, enabled: bool) {
        self.data.borrow_mut().log = enabled;
    }

    pub(crate) fn set_seq_num(&self, seq_num: u64) {
        self.data.borrow_mut().seq_num = seq_num;
    }

    pub(crate) fn set_generated(&self, at: SimTime) {
        self.data.borrow_mut().generated = at;
    }

    pub(crate) fn set_alive(&self, alive: bool) {
        self.data.borrow_mut().alive = alive;
    }

    pub(crate) fn set_location(&self, location: Location) {
        self.data.borrow_mut().location = location;
    }

    /// Records arrival at `resource` and derives the next hops from the
    /// pipeline.
    pub(crate) fn set_resource(&self, resource: &str) {
        let mut d = self.data.borrow_mut();
        d.visited.push(resource.to_string());
        d.resource = resource.to_string();
        d.next = d.pipeline.next_hops(resource).to_vec();
    }

    pub fn set_pipeline(&self, pipeline: Rc<Pipeline>) {
        let mut d = self.data.borrow_mut();
        d.next = pipeline.next_hops(&d.resource).to_vec();
        d.pipeline = pipeline;
    }

    /// Overrides the next hops for the current step only; the pipeline
    /// derives them again at the next resource.
    pub fn set_next<I, S>(&self, hops: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data.borrow_mut().next = hops.into_iter().map(Into::into).collect();
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.data.borrow().properties.contains_key(name)
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.data.borrow().properties.get(name).map(|p| p.value().clone())
    }

    pub fn property_f64(&self, name: &str) -> Option<f64> {
        self.property(name)?.as_f64()
    }

    pub fn property_i64(&self, name: &str) -> Option<i64> {
        let value = self.property(name)?;
        value.as_i64().or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
    }

    pub fn property_names(&self) -> Vec<String> {
        self.data.borrow().properties.keys().cloned().collect()
    }

    pub fn set_property(&self, name: &str, value: impl Into<Property>) {
        let mut property = value.into();
        if let Ok(ctx) = SimContext::upgrade(&self.ctx) {
            property.refresh(ctx.now());
        }
        self.data.borrow_mut().properties.insert(name.to_string(), property);
    }

    pub fn remove_property(&self, name: &str) -> Option<Value> {
        self.data.borrow_mut().properties.shift_remove(name).map(|p| p.value().clone())
    }

    pub(crate) fn refresh_properties(&self, now: SimTime) {
        for property in self.data.borrow_mut().properties.values_mut() {
            property.refresh(now);
        }
    }

    /// Independent duplicate with a fresh uid. Subscriptions are re-armed on
    /// the copy against the same events.
    pub fn copy(&self) -> Message {
        let ctx = SimContext::upgrade(&self.ctx).ok();
        let (data, subscriptions) = {
            let d = self.data.borrow();
            let data = MessageData {
                uid: ctx.as_ref().map_or(d.uid, SimContext::next_uid),
                id: d.id.clone(),
                seq_num: d.seq_num,
                generated: d.generated,
                generator: d.generator.clone(),
                alive: d.alive,
                log: d.log,
                location: d.location.clone(),
                properties: d.properties.clone(),
                subscriptions: IndexMap::new(),
                visited: d.visited.clone(),
                next: d.next.clone(),
                resource: d.resource.clone(),
                pipeline: d.pipeline.clone(),
            };
            let subscriptions: Vec<_> = d
                .subscriptions
                .iter()
                .map(|(id, s)| (id.clone(), s.event.clone(), s.callback.clone()))
                .collect();
            (data, subscriptions)
        };
        let copy = Message { data: Rc::new(RefCell::new(data)), ctx: self.ctx.clone() };
        for (id, event, callback) in subscriptions {
            if let Err(err) = copy.arm(&id, event, callback) {
                log::warn!("could not re-arm subscription '{id}' on copy: {err}");
            }
        }
        copy
    }

    /// Runs `callback` when `event` fires, unless the subscription is
    /// cancelled or the message dies first. Re-using an id replaces the
    /// previous subscription.
    pub fn subscribe(
        &self,
        id: &str,
        event: Event,
        callback: impl Fn(&Message, &Payload) + 'static,
    ) -> SimResult<()> {
        self.arm(id, event, Rc::new(callback))
    }

    fn arm(&self, id: &str, event: Event, callback: SubscriptionCallback) -> SimResult<()> {
        let ctx = SimContext::upgrade(&self.ctx)?;
        if self.data.borrow().subscriptions.contains_key(id) {
            self.unsubscribe(id)?;
        }
        let subscription = Subscription { event, disable: ctx.env().event(), callback };
        self.data.borrow_mut().subscriptions.insert(id.to_string(), subscription.clone());

        let message = self.clone();
        let id = id.to_string();
        ctx.env().process(async move { message.watch(id, subscription).await });
        Ok(())
    }

    async fn watch(self, id: String, subscription: Subscription) {
        let _ = subscription.event.or(&subscription.disable).await;
        {
            let mut d = self.data.borrow_mut();
            if d.subscriptions.get(&id).is_some_and(|s| s.disable == subscription.disable) {
                d.subscriptions.shift_remove(&id);
            }
        }
        if subscription.event.is_processed()
            && !subscription.disable.is_triggered()
            && self.is_alive()
        {
            let payload = subscription.event.value().unwrap_or(Value::Null);
            (subscription.callback)(&self, &payload);
        }
    }

    pub fn unsubscribe(&self, id: &str) -> SimResult<()> {
        let removed = self.data.borrow_mut().subscriptions.shift_remove(id);
        let subscription = removed.ok_or_else(|| SimError::UnknownSubscription(id.to_string()))?;
        subscription.disable.succeed(Value::Null)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.data.borrow().subscriptions.keys().cloned().collect()
    }

    /// Drops the message when `event` fires.
    pub fn drop_on(&self, cause: &str, event: Event) -> SimResult<()> {
        let cause_id = cause.to_string();
        self.subscribe(cause, event, move |message, _| {
            if let Err(err) = message.drop(&cause_id) {
                log::warn!("dropping {message:?} on '{cause_id}': {err}");
            }
        })
    }

    /// Removes the message from the network wherever it currently is.
    ///
    /// Queued messages leave their queue; messages in service have their
    /// task interrupted with `cause`.
    pub fn drop(&self, cause: &str) -> SimResult<()> {
        let ctx = SimContext::upgrade(&self.ctx)?;
        let location = self.location();
        self.done();
        match location {
            Location::Queue { resource, queue } => {
                ctx.resource(&resource)?.pipe().remove(&queue, self);
                self.timestamp(&format!("pipe.{queue}.{cause}"));
            }
            Location::Resource(resource) => {
                if !ctx.resource(&resource)?.interrupt_message(self, cause)? {
                    self.timestamp(&format!("resource.{cause}"));
                }
            }
            Location::Pipe(_) => self.timestamp(&format!("pipe.{cause}")),
            Location::Generator(_) => self.timestamp(&format!("generator.{cause}")),
        }
        Ok(())
    }

    /// Marks the message finished: no longer alive, no next hops and every
    /// subscription cancelled.
    pub fn done(&self) {
        let cancelled: Vec<Subscription> = {
            let mut d = self.data.borrow_mut();
            d.alive = false;
            d.next.clear();
            d.subscriptions.drain(..).map(|(_, s)| s).collect()
        };
        for subscription in cancelled {
            let _ = subscription.disable.succeed(Value::Null);
        }
    }

    /// Appends a lifecycle record to the log stream, honouring the message
    /// and resource log flags.
    pub fn timestamp(&self, event: &str) {
        let Ok(ctx) = SimContext::upgrade(&self.ctx) else { return };
        let entry = {
            let d = self.data.borrow();
            if !d.log {
                return;
            }
            let muted = ctx
                .resource(d.location.resource_id())
                .map(|r| !r.log_enabled())
                .unwrap_or(false);
            if muted {
                return;
            }
            let properties = ctx
                .log_properties()
                .into_iter()
                .map(|name| {
                    let value = d
                        .properties
                        .get(&name)
                        .map(|p| p.value().clone())
                        .unwrap_or_else(|| Value::String("NA".into()));
                    (name, value)
                })
                .collect();
            Timestamp {
                time: ctx.now(),
                message: d.id.clone(),
                seq_num: d.seq_num,
                resource: d.resource.clone(),
                event: event.to_string(),
                properties,
            }
        };
        ctx.record(&entry);
    }
}
