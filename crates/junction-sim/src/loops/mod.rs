//! Background loops for the engine.

pub mod tick_loop;
