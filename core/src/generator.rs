use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::context::SimContext;
use crate::message::{Location, Message};
use crate::pipeline::Pipeline;
use crate::resource::Resource;

/// Emission loop of a generator.
pub trait GeneratorBehavior {
    fn generate(&self, generator: Resource) -> LocalBoxFuture<'static, ()>;
}

pub(crate) struct GeneratorState {
    template: Message,
    generated: Cell<u64>,
    limit: Cell<Option<u64>>,
    behavior: RefCell<Rc<dyn GeneratorBehavior>>,
}

impl GeneratorState {
    pub(crate) fn new(ctx: &SimContext, id: &str, behavior: Rc<dyn GeneratorBehavior>) -> Self {
        Self {
            template: Message::template(ctx, id),
            generated: Cell::new(0),
            limit: Cell::new(None),
            behavior: RefCell::new(behavior),
        }
    }
}

/// Waits `initial`, then emits a message every `arrival` time units until
/// the arrival process produces nothing or the emission limit is reached.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrivalProcess;

impl GeneratorBehavior for ArrivalProcess {
    fn generate(&self, generator: Resource) -> LocalBoxFuture<'static, ()> {
        async move {
            let Ok(ctx) = generator.context() else { return };
            let env = ctx.env().clone();
            let initial = generator.random("initial").unwrap_or(0.0);
            match env.try_timeout(initial, Value::Null) {
                Ok(delay) => {
                    if delay.await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    log::error!("{}: bad initial delay: {err}", generator.id());
                    return;
                }
            }
            while !generator.limit_reached() {
                let message = generator.emit();
                generator.send(message);
                let Some(arrival) = generator.random("arrival") else { break };
                match env.try_timeout(arrival, Value::Null) {
                    Ok(next) => {
                        if next.await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::error!("{}: bad inter-arrival time: {err}", generator.id());
                        break;
                    }
                }
            }
            log::debug!("{}: stopped after {} messages", generator.id(), generator.generated());
        }
        .boxed_local()
    }
}

impl Resource {
    /// The template message of a generator. Properties set on it are copied
    /// into every emitted message.
    pub fn message(&self) -> Option<Message> {
        self.generator_state().map(|g| g.template.clone())
    }

    pub fn generated(&self) -> u64 {
        self.generator_state().map_or(0, |g| g.generated.get())
    }

    pub fn set_limit(&self, limit: Option<u64>) {
        if let Some(g) = self.generator_state() {
            g.limit.set(limit);
        }
    }

    fn limit_reached(&self) -> bool {
        match self.generator_state() {
            Some(g) => g.limit.get().is_some_and(|limit| g.generated.get() >= limit),
            None => true,
        }
    }

    pub fn set_generator_behavior(&self, behavior: Rc<dyn GeneratorBehavior>) {
        if let Some(g) = self.generator_state() {
            *g.behavior.borrow_mut() = behavior;
        }
    }

    pub(crate) fn start_generator(&self) {
        let Some(g) = self.generator_state() else { return };
        let Ok(ctx) = self.context() else { return };
        let body = g.behavior.borrow().generate(self.clone());
        ctx.env().process(body);
    }

    /// Points the template at `pipeline` so emitted messages route by it.
    pub(crate) fn rebind(&self, pipeline: Rc<Pipeline>) {
        if let Some(g) = self.generator_state() {
            g.template.set_pipeline(pipeline);
        }
    }

    /// Builds the next message from the template: fresh `seq_num`, refreshed
    /// properties and, when it has a `lifetime`, an expiry drop.
    pub fn emit(&self) -> Message {
        let Some(g) = self.generator_state() else {
            return Message::new(self.id());
        };
        let message = g.template.copy();
        let seq_num = g.generated.get();
        g.generated.set(seq_num + 1);
        message.set_seq_num(seq_num);
        message.set_location(Location::Generator(self.id().to_string()));

        if let Ok(ctx) = self.context() {
            let now = ctx.now();
            message.set_generated(now);
            message.refresh_properties(now);
            if let Some(lifetime) = message.property_f64("lifetime") {
                let armed = ctx
                    .env()
                    .try_timeout(lifetime, json!("expired"))
                    .and_then(|expiry| message.drop_on("lifetime", expiry));
                if let Err(err) = armed {
                    log::warn!("{}: lifetime {lifetime} not armed: {err}", self.id());
                }
            }
        }
        message.set_alive(true);
        message
    }
}
