use crate::commands::{unknown_command, wrong_args, Request};
use crate::protocol::RespValue;
use std::mem;

const NESTED_MULTI: &str = "ERR MULTI calls can not be nested";
const EXEC_WITHOUT_MULTI: &str = "ERR EXEC without MULTI";
const EXEC_ABORT: &str = "EXECABORT Transaction discarded because of previous errors.";

/// Where a connection is in the MULTI/EXEC protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxState {
    /// No transaction; commands run immediately.
    #[default]
    Idle,
    /// Inside MULTI; commands are queued.
    Open,
    /// Inside MULTI after an error; EXEC will discard the queue.
    Poisoned,
}

/// Result of an EXEC request.
#[derive(Debug, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Reply with this value; nothing runs.
    Reply(RespValue),
    /// Run these requests in order and reply with an array of their results.
    Run(Vec<Request>),
}

/// Transaction state of a single connection.
///
/// Owned by the connection's dispatch loop and never shared. Dropping it
/// (connection closed) discards anything queued.
#[derive(Debug, Default)]
pub struct Transaction {
    state: TxState,
    queued: Vec<Request>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// True between MULTI and EXEC, poisoned or not.
    pub fn is_active(&self) -> bool {
        self.state != TxState::Idle
    }

    pub fn queued(&self) -> &[Request] {
        &self.queued
    }

    /// Handles a MULTI request.
    pub fn multi(&mut self, req: &Request) -> RespValue {
        if req.argc() != 1 {
            self.poison();
            return wrong_args(req.name());
        }
        match self.state {
            TxState::Idle => {
                self.state = TxState::Open;
                RespValue::ok()
            }
            TxState::Open | TxState::Poisoned => {
                self.poison();
                RespValue::error(NESTED_MULTI)
            }
        }
    }

    /// Handles an EXEC request. Every path except the wrong-arity one inside
    /// a transaction leaves the state `Idle` with an empty queue.
    pub fn exec(&mut self, req: &Request) -> ExecOutcome {
        if req.argc() != 1 {
            self.poison();
            return ExecOutcome::Reply(wrong_args(req.name()));
        }
        match self.state {
            TxState::Idle => ExecOutcome::Reply(RespValue::error(EXEC_WITHOUT_MULTI)),
            TxState::Poisoned => {
                self.reset();
                ExecOutcome::Reply(RespValue::error(EXEC_ABORT))
            }
            TxState::Open => {
                let batch = mem::take(&mut self.queued);
                self.reset();
                ExecOutcome::Run(batch)
            }
        }
    }

    /// Handles any other command while a transaction is active.
    ///
    /// `registered` says whether the registry has a handler for it. Unknown
    /// commands poison the transaction; once poisoned, nothing more is queued
    /// but known commands are still acknowledged with `QUEUED`.
    pub fn queue(&mut self, req: Request, registered: bool) -> RespValue {
        debug_assert!(self.is_active(), "queue called outside MULTI");
        if !registered {
            self.poison();
            return unknown_command(req.name());
        }
        if self.state == TxState::Open {
            self.queued.push(req);
        }
        RespValue::queued()
    }

    fn poison(&mut self) {
        if self.is_active() {
            self.state = TxState::Poisoned;
        }
    }

    fn reset(&mut self) {
        self.state = TxState::Idle;
        self.queued.clear();
    }
}
