use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rand::prelude::*;
use rand_distr::{Exp, Normal};

use crate::engine::SimTime;

/// Random number generator shared by every random process of a simulation.
pub type SharedRng = Rc<RefCell<StdRng>>;

pub fn seeded_rng(seed: u64) -> SharedRng {
    Rc::new(RefCell::new(StdRng::seed_from_u64(seed)))
}

/// Value source for one window of a step-function random process.
#[derive(Clone)]
pub enum Producer {
    /// Produces nothing for this window.
    Skip,
    Constant(f64),
    Uniform { low: f64, high: f64 },
    Exponential { lambda: f64 },
    /// Normal draw clamped at zero.
    Normal { mean: f64, std_dev: f64 },
    /// Integer drawn from `low..=high`.
    UniformInt { low: i64, high: i64 },
    Custom(Rc<dyn Fn(&mut StdRng) -> Option<f64>>),
    /// A skipped window folded into the next producer: yields `span` plus
    /// the next producer's value.
    Deferred { span: f64, next: Box<Producer> },
}

impl Producer {
    pub fn constant(value: f64) -> Self {
        Self::Constant(value)
    }

    pub fn uniform(low: f64, high: f64) -> Self {
        Self::Uniform { low, high }
    }

    pub fn expo(lambda: f64) -> Self {
        Self::Exponential { lambda }
    }

    pub fn normal(mean: f64, std_dev: f64) -> Self {
        Self::Normal { mean, std_dev }
    }

    pub fn randint(low: i64, high: i64) -> Self {
        Self::UniformInt { low, high }
    }

    pub fn from_fn(f: impl Fn(&mut StdRng) -> Option<f64> + 'static) -> Self {
        Self::Custom(Rc::new(f))
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }

    /// Draws one value. Invalid distribution parameters produce nothing.
    pub fn sample(&self, rng: &mut StdRng) -> Option<f64> {
        match self {
            Self::Skip => None,
            Self::Constant(v) => Some(*v),
            Self::Uniform { low, high } => {
                if !(low.is_finite() && high.is_finite() && (high - low).is_finite()) {
                    log::warn!("uniform producer U({low}, {high}): bounds must be finite");
                    None
                } else if high > low {
                    Some(rng.gen_range(*low..*high))
                } else {
                    Some(*low)
                }
            }
            Self::Exponential { lambda } => match Exp::new(*lambda) {
                Ok(dist) => Some(dist.sample(rng)),
                Err(err) => {
                    log::warn!("exponential producer with lambda {lambda}: {err}");
                    None
                }
            },
            Self::Normal { mean, std_dev } => match Normal::new(*mean, *std_dev) {
                Ok(dist) => Some(dist.sample(rng).max(0.0)),
                Err(err) => {
                    log::warn!("normal producer N({mean}, {std_dev}): {err}");
                    None
                }
            },
            Self::UniformInt { low, high } => {
                if high >= low {
                    Some(rng.gen_range(*low..=*high) as f64)
                } else {
                    Some(*low as f64)
                }
            }
            Self::Custom(f) => f(rng),
            Self::Deferred { span, next } => next.sample(rng).map(|v| span + v),
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "Skip"),
            Self::Constant(v) => write!(f, "Constant({v})"),
            Self::Uniform { low, high } => write!(f, "Uniform({low}, {high})"),
            Self::Exponential { lambda } => write!(f, "Exponential({lambda})"),
            Self::Normal { mean, std_dev } => write!(f, "Normal({mean}, {std_dev})"),
            Self::UniformInt { low, high } => write!(f, "UniformInt({low}, {high})"),
            Self::Custom(_) => write!(f, "Custom"),
            Self::Deferred { span, next } => write!(f, "Deferred({span} + {next:?})"),
        }
    }
}

impl From<f64> for Producer {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

#[derive(Debug, Clone)]
pub struct RandomStep {
    pub from: SimTime,
    pub to: SimTime,
    pub producer: Producer,
}

/// Piecewise-in-time random process.
///
/// Built from a breakpoint table; each step covers `[from, to)` and the last
/// one extends to infinity. Expired steps are discarded as the clock moves
/// forward, so queries must come with non-decreasing times.
#[derive(Debug, Clone)]
pub struct RandomProcess {
    steps: VecDeque<RandomStep>,
    rng: SharedRng,
}

impl RandomProcess {
    pub fn new<I>(table: I, rng: SharedRng) -> Self
    where
        I: IntoIterator<Item = (SimTime, Producer)>,
    {
        let mut points: Vec<(SimTime, Producer)> = Vec::new();
        for (at, producer) in table {
            if !at.is_finite() {
                continue;
            }
            match points.iter_mut().find(|(t, _)| *t == at) {
                Some(slot) => slot.1 = producer,
                None => points.push((at, producer)),
            }
        }
        if !points.iter().any(|(t, _)| *t == 0.0) {
            points.push((0.0, Producer::Skip));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        points.push((SimTime::INFINITY, Producer::Skip));

        let mut steps = VecDeque::new();
        let mut i = 0;
        while i + 1 < points.len() {
            let from = points[i].0;
            if !points[i].1.is_skip() {
                steps.push_back(RandomStep { from, to: points[i + 1].0, producer: points[i].1.clone() });
                i += 1;
                continue;
            }
            match (i + 1..points.len()).find(|&j| !points[j].1.is_skip()) {
                Some(j) => {
                    let to = points[j].0;
                    let next = Box::new(points[j].1.clone());
                    steps.push_back(RandomStep { from, to, producer: Producer::Deferred { span: to - from, next } });
                    i = j;
                }
                None => {
                    steps.push_back(RandomStep { from, to: SimTime::INFINITY, producer: Producer::Skip });
                    break;
                }
            }
        }
        Self { steps, rng }
    }

    pub fn constant(value: f64, rng: SharedRng) -> Self {
        Self::new([(0.0, Producer::Constant(value))], rng)
    }

    /// Value of the process at `now`, or `None` when the active window
    /// produces nothing.
    pub fn value(&mut self, now: SimTime) -> Option<f64> {
        while self.steps.front().is_some_and(|s| now >= s.to) {
            self.steps.pop_front();
        }
        let step = self.steps.front()?;
        if now < step.from {
            return None;
        }
        step.producer.sample(&mut self.rng.borrow_mut())
    }

    pub fn steps(&self) -> impl Iterator<Item = &RandomStep> {
        self.steps.iter()
    }
}

/// Named random processes owned by a resource or generator.
#[derive(Debug, Clone, Default)]
pub struct RandomDict {
    processes: IndexMap<String, RandomProcess>,
}

impl RandomDict {
    pub fn insert(&mut self, name: impl Into<String>, process: RandomProcess) {
        self.processes.insert(name.into(), process);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    pub fn value(&mut self, name: &str, now: SimTime) -> Option<f64> {
        self.processes.get_mut(name)?.value(now)
    }
}
