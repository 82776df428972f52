mod determinism;
mod disciplines;
mod flow;
mod lifetime;
mod topology;
