use std::future::Future;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::context::SimContext;
use crate::engine::{Environment, SimTime};
use crate::event::{Event, Interrupt};
use crate::message::Message;
use crate::random::Producer;
use crate::resource::Resource;

pub type ServiceFuture = LocalBoxFuture<'static, Result<(), Interrupt>>;

/// How a resource serves one message.
///
/// The returned future runs inside the task's process. Awaiting events in it
/// yields `Err(Interrupt)` when the task is preempted or the message dropped;
/// propagating that with `?` is the expected handling.
pub trait ServiceBehavior {
    fn serve(&self, cx: ServiceContext, message: Message) -> ServiceFuture;
}

/// Adapts a closure into a [`ServiceBehavior`].
pub struct ServiceFn<F>(F);

pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: Fn(ServiceContext, Message) -> Fut,
    Fut: Future<Output = Result<(), Interrupt>> + 'static,
{
    ServiceFn(f)
}

impl<F, Fut> ServiceBehavior for ServiceFn<F>
where
    F: Fn(ServiceContext, Message) -> Fut,
    Fut: Future<Output = Result<(), Interrupt>> + 'static,
{
    fn serve(&self, cx: ServiceContext, message: Message) -> ServiceFuture {
        (self.0)(cx, message).boxed_local()
    }
}

/// Everything a service routine may touch while serving a message.
#[derive(Clone)]
pub struct ServiceContext {
    resource: Resource,
    sim: SimContext,
    task: u64,
}

impl ServiceContext {
    pub(crate) fn new(resource: Resource, sim: SimContext, task: u64) -> Self {
        Self { resource, sim, task }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn sim(&self) -> &SimContext {
        &self.sim
    }

    pub fn env(&self) -> &Environment {
        self.sim.env()
    }

    pub fn now(&self) -> SimTime {
        self.sim.now()
    }

    pub fn task_id(&self) -> u64 {
        self.task
    }

    /// Timeout that treats negative delays as zero.
    pub fn timeout(&self, delay: SimTime) -> Event {
        if delay.is_nan() || delay < 0.0 {
            log::warn!("{}: negative service delay {delay} clamped to 0", self.resource.id());
            return self.env().timeout(0.0);
        }
        self.env().timeout(delay)
    }

    /// Current value of the resource's named random process.
    pub fn random(&self, name: &str) -> Option<f64> {
        self.resource.random(name)
    }

    pub fn sample(&self, producer: &Producer) -> Option<f64> {
        self.sim.sample(producer)
    }
}

/// Holds the message for the resource's `service` random value (0 when
/// unset).
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultService;

impl ServiceBehavior for DefaultService {
    fn serve(&self, cx: ServiceContext, _message: Message) -> ServiceFuture {
        async move {
            let delay = cx.random("service").unwrap_or(0.0);
            cx.timeout(delay).await?;
            Ok(())
        }
        .boxed_local()
    }
}

/// Service that keeps its remaining time in the message's `wait` property,
/// so preemptive disciplines can shorten or reset it between attempts.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreemptiveService;

impl ServiceBehavior for PreemptiveService {
    fn serve(&self, cx: ServiceContext, message: Message) -> ServiceFuture {
        async move {
            if !message.has_property("wait") {
                let drawn = cx.random("service").unwrap_or(0.0);
                message.set_property("wait", drawn);
            }
            let wait = message.property_f64("wait").unwrap_or(0.0);
            cx.timeout(wait).await?;
            Ok(())
        }
        .boxed_local()
    }
}
