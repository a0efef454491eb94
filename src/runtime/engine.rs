//! Exclusive ownership of one embedded Lua state.
//!
//! An [`EngineInstance`] is the only handle to its `mlua::Lua`. Closing drops
//! the state; any later access or a second close is an error that is logged
//! and audited, never silently ignored. `Drop` closes an instance that was
//! never closed explicitly (panic paths).

use crate::config::types::{Result, SandboxError};
use crate::observability::audit;
use crate::safety::teardown::TeardownLedger;
use mlua::{Lua, LuaOptions, StdLib};
use uuid::Uuid;

/// Standard libraries opened in every instance. `debug` is opened only so its
/// introspection functions can be captured; the global is removed before any
/// learner code is loaded.
pub fn engine_libraries() -> StdLib {
    StdLib::TABLE
        | StdLib::STRING
        | StdLib::MATH
        | StdLib::COROUTINE
        | StdLib::UTF8
        | StdLib::DEBUG
}

pub struct EngineInstance {
    id: String,
    lua: Option<Lua>,
    ledger: TeardownLedger,
}

impl EngineInstance {
    /// Create a fresh Lua state and record it in the ledger
    pub fn new(ledger: TeardownLedger) -> Result<Self> {
        // SAFETY: the debug library is the only unsafe library requested. The
        // environment builder captures `getinfo`/`getlocal` into the registry
        // and removes the `debug` global before any learner chunk is loaded,
        // so learner code never reaches it.
        let lua = unsafe { Lua::unsafe_new_with(engine_libraries(), LuaOptions::default()) };

        let id = Uuid::new_v4().to_string();
        ledger.record_created(&id);
        log::debug!("Engine instance {} created", id);

        Ok(Self {
            id,
            lua: Some(lua),
            ledger,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_open(&self) -> bool {
        self.lua.is_some()
    }

    /// Borrow the Lua state. Fails loudly after teardown.
    pub fn lua(&self) -> Result<&Lua> {
        match &self.lua {
            Some(lua) => Ok(lua),
            None => {
                log::error!("Engine instance {} used after teardown", self.id);
                audit::teardown_violation(&self.id, "used after teardown".to_string());
                Err(SandboxError::InstanceClosed {
                    instance_id: self.id.clone(),
                })
            }
        }
    }

    /// Close the Lua state. A second call is an error.
    pub fn close(&mut self) -> Result<()> {
        match self.lua.take() {
            Some(lua) => {
                // A hook closure may hold run state; detach it before the state goes
                lua.remove_hook();
                drop(lua);
                self.ledger.record_closed(&self.id)
            }
            None => self.ledger.record_closed(&self.id),
        }
    }
}

impl Drop for EngineInstance {
    fn drop(&mut self) {
        if self.lua.is_some() {
            log::warn!(
                "Engine instance {} dropped without explicit teardown",
                self.id
            );
            if let Err(err) = self.close() {
                log::error!("Engine instance {} teardown in drop failed: {}", self.id, err);
            }
        }
    }
}
