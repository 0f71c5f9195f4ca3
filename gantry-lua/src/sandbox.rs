//! Lua sandbox creation
//!
//! This module provides a restricted Lua sandbox that prevents access to
//! dangerous operations like filesystem I/O, network access, and process execution.
//!
//! Pipeline scripts only describe a pipeline; they never run anything
//! themselves. The `pipeline` helper module is always injected since every
//! definition is evaluated through it.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table, Value};

/// Create a restricted Lua sandbox
///
/// This sandbox includes only basic Lua functionality (tables, strings, math)
/// and does NOT include any I/O capabilities or the ability to load external code.
///
/// # Security
/// This sandbox prevents:
/// - Network access
/// - File system access
/// - Process execution
/// - Loading external modules via require()
///
/// # Example
/// ```no_run
/// use gantry_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let pipeline_table: mlua::Table = lua
///     .load(r#"return pipeline.define { name = "api", stages = {} }"#)
///     .eval()?;
/// let name: String = pipeline_table.get("name")?;
/// assert_eq!(name, "api");
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // Only allow: TABLE, STRING, MATH
    // Explicitly exclude: IO, OS, PACKAGE, DEBUG, COROUTINE
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )
    };

    // Remove dangerous globals
    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;

    register_pipeline_module(&lua)?;

    Ok(lua)
}

/// Register the pipeline module
///
/// Helpers return plain tables so a script may use them or write the
/// tables by hand; the parser accepts both.
fn register_pipeline_module(lua: &Lua) -> LuaResult<()> {
    let pipeline = lua.create_table()?;

    // pipeline.define(definition) - returns the definition table as-is
    let define_fn = lua.create_function(|_, definition: Table| Ok(definition))?;
    pipeline.set("define", define_fn)?;

    // pipeline.stage(config) - returns the config table as-is
    let stage_fn = lua.create_function(|_, config: Table| Ok(config))?;
    pipeline.set("stage", stage_fn)?;

    // pipeline.job(config) - returns the config table as-is
    let job_fn = lua.create_function(|_, config: Table| Ok(config))?;
    pipeline.set("job", job_fn)?;

    // pipeline.deploy(config) - marks the stage as a deployment fan-out
    let deploy_fn = lua.create_function(|_, config: Table| {
        config.set("type", "deploy")?;
        Ok(config)
    })?;
    pipeline.set("deploy", deploy_fn)?;

    // pipeline.secret(name, path, version?) - a secret reference
    let secret_fn = lua.create_function(
        |lua, (name, path, version): (String, String, Option<String>)| {
            let secret = lua.create_table()?;
            secret.set("name", name)?;
            secret.set("path", path)?;
            if let Some(version) = version {
                secret.set("version", version)?;
            }
            Ok(secret)
        },
    )?;
    pipeline.set("secret", secret_fn)?;

    // pipeline.target(function_name, options?) - a deployment target
    let target_fn = lua.create_function(|lua, (name, options): (String, Option<Table>)| {
        let target = lua.create_table()?;
        target.set("function_name", name.clone())?;

        let mut entry_point = Value::Nil;
        let mut secrets = Value::Nil;
        if let Some(options) = options {
            entry_point = options.get("entry_point")?;
            secrets = options.get("secrets")?;
        }

        match entry_point {
            Value::Nil => target.set("entry_point", name)?,
            other => target.set("entry_point", other)?,
        }
        target.set("secrets", secrets)?;
        Ok(target)
    })?;
    pipeline.set("target", target_fn)?;

    lua.globals().set("pipeline", pipeline)?;

    Ok(())
}
