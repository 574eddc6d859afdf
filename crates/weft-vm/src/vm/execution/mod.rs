//! Instruction execution handlers

mod arithmetic;
mod control;
mod functions;
mod objects;
mod variables;
