//! Restricted learner environment.
//!
//! Built once per engine instance, before any learner chunk is compiled:
//!
//! 1. capture `tostring`, `debug.getinfo` and `debug.getlocal` into named
//!    registry slots,
//! 2. replace `print` with a bounded native writer,
//! 3. nil every banned global and read each one back,
//! 4. optionally swap `_G` for a sentinel that refuses all access,
//! 5. apply the allocator cap.

use crate::config::types::{ErrorInfo, Policy, Result, SandboxError};
use crate::exec::context::RunContext;
use crate::observability::audit;
use crate::runtime::render::{coerce, truncate_value};
use crate::testing::fault_injection::Checkpoint;
use crate::utils::output::SinkWrite;
use mlua::{Function, Lua, MetaMethod, MultiValue, Table, UserData, UserDataMethods, Value};
use std::rc::Rc;

pub const TOSTRING_KEY: &str = "luabox.tostring";
pub const GETINFO_KEY: &str = "luabox.getinfo";
pub const GETLOCAL_KEY: &str = "luabox.getlocal";

/// Global name the sentinel replaces
pub const GLOBAL_TABLE_NAME: &str = "_G";

/// Prepare `lua` for learner code under `ctx`'s policy
pub fn build(lua: &Lua, ctx: &Rc<RunContext>) -> Result<()> {
    let policy = ctx.policy();

    capture_builtins(lua)?;
    install_print(lua, ctx)?;
    remove_banned_globals(lua, policy)?;
    if policy.restrict_global_table {
        install_global_sentinel(lua, ctx)?;
    }
    if let Some(bytes) = policy.max_memory_bytes {
        lua.set_memory_limit(bytes)?;
    }

    log::debug!(
        "environment ready for session {} ({} globals removed)",
        ctx.correlation().session_id,
        policy.banned_global_names.len()
    );
    Ok(())
}

fn capture_builtins(lua: &Lua) -> Result<()> {
    let globals = lua.globals();
    let tostring: Function = globals.get("tostring")?;
    let debug: Table = globals.get("debug")?;
    let getinfo: Function = debug.get("getinfo")?;
    let getlocal: Function = debug.get("getlocal")?;

    lua.set_named_registry_value(TOSTRING_KEY, tostring)?;
    lua.set_named_registry_value(GETINFO_KEY, getinfo)?;
    lua.set_named_registry_value(GETLOCAL_KEY, getlocal)?;
    Ok(())
}

fn install_print(lua: &Lua, ctx: &Rc<RunContext>) -> Result<()> {
    let ctx = Rc::clone(ctx);
    let print = lua.create_function(move |lua, args: MultiValue| {
        if let Err(err) = ctx.checkpoint(Checkpoint::Output) {
            ctx.arm_unwind(lua);
            return Err(err);
        }

        let policy = ctx.policy();
        let tostring: Function = lua.named_registry_value(TOSTRING_KEY)?;
        let mut parts = Vec::new();
        for value in args.into_iter().take(policy.max_print_args) {
            parts.push(truncate_value(
                coerce(&tostring, value)?,
                policy.max_value_chars,
            ));
        }

        if let SinkWrite::Truncated(limit) = ctx.write_line(parts.join("\t")) {
            if policy.fail_on_output_overflow {
                let info = ErrorInfo::resource_limit(limit, policy.threshold(limit));
                let err = ctx.raise(info);
                ctx.arm_unwind(lua);
                return Err(err);
            }
        }
        Ok(())
    })?;
    lua.globals().set("print", print)?;
    Ok(())
}

fn remove_banned_globals(lua: &Lua, policy: &Policy) -> Result<()> {
    let globals = lua.globals();
    for name in &policy.banned_global_names {
        globals.set(name.as_str(), Value::Nil)?;
    }

    for name in &policy.banned_global_names {
        let survivor: Value = globals.get(name.as_str())?;
        if !matches!(survivor, Value::Nil) {
            log::error!("banned global '{}' survived removal", name);
            return Err(SandboxError::Config(format!(
                "banned global '{}' is still reachable",
                name
            )));
        }
    }
    Ok(())
}

fn install_global_sentinel(lua: &Lua, ctx: &Rc<RunContext>) -> Result<()> {
    let sentinel = lua.create_userdata(GlobalTableSentinel {
        ctx: Rc::clone(ctx),
    })?;
    lua.globals().set(GLOBAL_TABLE_NAME, sentinel)?;
    Ok(())
}

/// Stand-in for `_G`. Every use counts as reaching for a removed capability.
pub struct GlobalTableSentinel {
    ctx: Rc<RunContext>,
}

impl GlobalTableSentinel {
    fn block(&self, lua: &Lua, operation: MetaMethod) -> mlua::Error {
        audit::capability_access(
            self.ctx.correlation().clone(),
            &format!("{}.{}", GLOBAL_TABLE_NAME, operation),
        );
        let err = self.ctx.raise(ErrorInfo::capability_blocked());
        self.ctx.arm_unwind(lua);
        err
    }
}

impl UserData for GlobalTableSentinel {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        for operation in [
            MetaMethod::Index,
            MetaMethod::NewIndex,
            MetaMethod::Call,
            MetaMethod::Len,
            MetaMethod::Pairs,
        ] {
            methods.add_meta_method(
                operation,
                move |lua, this, _args: MultiValue| -> mlua::Result<()> {
                    Err(this.block(lua, operation))
                },
            );
        }
    }
}
