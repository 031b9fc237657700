//! Transaction State Machine
//!
//! Implements client-visible MULTI/EXEC semantics so command handlers never
//! have to know whether they run inside a transaction.
//!
//! ```text
//!              MULTI
//!   ┌──────┐ ─────────> ┌──────┐  known cmd: append, QUEUED
//!   │ Idle │            │ Open │ ◄────────┐
//!   └──────┘ <───────── └──┬───┘ ─────────┘
//!      ▲    EXEC: run queue │
//!      │                    │ unknown cmd, nested MULTI,
//!      │                    │ MULTI/EXEC with arguments
//!      │                    ▼
//!      │   EXEC:        ┌──────────┐  any cmd: reply only,
//!      └─────────────── │ Poisoned │  queue is frozen
//!         EXECABORT     └──────────┘
//! ```
//!
//! EXEC without MULTI is answered with an error and leaves the state `Idle`.
//! The state machine only decides replies and what runs; executing the
//! queued batch is the dispatch loop's job.

pub mod state;

pub use state::{ExecOutcome, Transaction, TxState};
