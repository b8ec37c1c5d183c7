//! Lua 5.4 bindings exposed to scripts, via the `mlua` crate.
//!
//! # Lua API
//!
//! The following globals are registered in every script state:
//!
//! | Lua                          | Effect                                        |
//! |------------------------------|-----------------------------------------------|
//! | `client:get(path)`           | GET `path`, yields until the response arrives |
//! | `client:get_all(paths)`      | GET every path concurrently, responses in order |
//! | `response.status`            | HTTP status code (integer)                    |
//! | `response.data`              | body text                                     |
//! | `response:json()`            | body parsed as JSON                           |
//! | `json.decode(text)`          | parse JSON text into Lua values               |
//! | `json.encode(value)`         | serialize a Lua value to JSON text            |
//! | `join_all(fns)`              | call each function concurrently, wait for all |
//! | `sleep(ms [, value])`        | yield for `ms` milliseconds, return `value`   |
//! | `print(...)`                 | send a tab-joined line to the output sink     |
//!
//! Everything that waits is an async Rust function: calling it yields the
//! script's coroutine until the underlying future completes. Wait-for-all
//! helpers fail with the first error that occurs and return arrays (an
//! empty aggregate is `[]`, not `{}`).
//!
//! `coroutine.resume` and `coroutine.wrap` are replaced with versions that
//! keep resumed coroutines under the run's [`Watchdog`]. Once the watchdog
//! has fired, `pcall`, `xpcall` and `coroutine.resume` re-raise instead of
//! returning, so a spent deadline cannot be caught.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{poll_fn, try_join_all};
use mlua::prelude::*;

use crate::client::{HttpClient, Response};
use crate::error::ClientError;
use crate::output::OutputSink;

/// Standard libraries loaded into a script state. `io`, `os`, `package` and
/// `debug` are left out.
pub fn sandbox_libs() -> LuaStdLib {
    LuaStdLib::TABLE | LuaStdLib::STRING | LuaStdLib::MATH | LuaStdLib::UTF8 | LuaStdLib::COROUTINE
}

// ── Watchdog ──────────────────────────────────────────────────────────────────

/// Aborts a run once its deadline has passed, even if the script never
/// yields.
///
/// mlua keeps a single instruction hook per state and a hook fires only on
/// the thread it was last installed on, so the hook follows execution: it
/// is moved onto each coroutine right before it resumes and handed back to
/// the resuming thread afterwards.
pub(crate) struct Watchdog {
    deadline: Instant,
    interval: u32,
    expired: Arc<AtomicBool>,
    running: RefCell<Vec<LuaThread>>,
}

impl Watchdog {
    /// Attach a watchdog to `lua`; `expired` is set when it fires.
    pub(crate) fn install(lua: &Lua, deadline: Instant, interval: u32, expired: Arc<AtomicBool>) {
        lua.set_app_data(Rc::new(Watchdog {
            deadline,
            interval: interval.max(1),
            expired,
            running: RefCell::new(Vec::new()),
        }));
    }

    fn of(lua: &Lua) -> Option<Rc<Watchdog>> {
        lua.app_data_ref::<Rc<Watchdog>>().map(|w| Rc::clone(&w))
    }

    fn fired(lua: &Lua) -> bool {
        Self::of(lua).is_some_and(|w| w.expired.load(Ordering::SeqCst))
    }

    fn enter(&self, thread: &LuaThread) {
        self.hook(thread);
        self.running.borrow_mut().push(thread.clone());
    }

    fn leave(&self) {
        let mut running = self.running.borrow_mut();
        running.pop();
        if let Some(parent) = running.last() {
            self.hook(parent);
        }
    }

    fn hook(&self, thread: &LuaThread) {
        let deadline = self.deadline;
        let expired = Arc::clone(&self.expired);
        thread.set_hook(
            LuaHookTriggers::new().every_nth_instruction(self.interval),
            move |_, _| {
                if Instant::now() >= deadline {
                    expired.store(true, Ordering::SeqCst);
                    return Err(deadline_exceeded());
                }
                Ok(LuaVmState::Continue)
            },
        );
    }
}

fn deadline_exceeded() -> LuaError {
    LuaError::runtime("script deadline exceeded")
}

/// Call `func` on a new coroutine, driven as a future, with the watchdog
/// (if any) following it.
pub(crate) async fn call_watched<R>(
    lua: &Lua,
    func: LuaFunction,
    args: impl IntoLuaMulti,
) -> LuaResult<R>
where
    R: FromLuaMulti,
{
    let thread = lua.create_thread(func)?;
    let watchdog = Watchdog::of(lua);
    let mut run = Box::pin(thread.clone().into_async::<R>(args));
    poll_fn(move |cx| match &watchdog {
        Some(watchdog) => {
            watchdog.enter(&thread);
            let poll = run.as_mut().poll(cx);
            watchdog.leave();
            poll
        }
        None => run.as_mut().poll(cx),
    })
    .await
}

/// `coroutine.resume` that moves the watchdog onto the resumed coroutine.
fn resume_watched(lua: &Lua, (co, args): (LuaThread, LuaMultiValue)) -> LuaResult<LuaMultiValue> {
    let watchdog = Watchdog::of(lua);
    if let Some(w) = &watchdog {
        w.enter(&co);
    }
    let result = co.resume::<LuaMultiValue>(args);
    if let Some(w) = &watchdog {
        w.leave();
    }
    if Watchdog::fired(lua) {
        return Err(deadline_exceeded());
    }

    let mut out = LuaMultiValue::new();
    match result {
        Ok(values) => {
            out.push_back(LuaValue::Boolean(true));
            out.extend(values);
        }
        Err(LuaError::CoroutineUnresumable) => {
            out.push_back(LuaValue::Boolean(false));
            out.push_back(LuaValue::String(lua.create_string("cannot resume dead coroutine")?));
        }
        Err(LuaError::RuntimeError(msg)) => {
            out.push_back(LuaValue::Boolean(false));
            out.push_back(LuaValue::String(lua.create_string(&msg)?));
        }
        Err(err) => {
            out.push_back(LuaValue::Boolean(false));
            out.push_back(LuaValue::Error(Box::new(err)));
        }
    }
    Ok(out)
}

/// Pass protected-call results through, unless the watchdog has fired.
fn rethrow_expired(lua: &Lua, values: LuaMultiValue) -> LuaResult<LuaMultiValue> {
    if Watchdog::fired(lua) {
        return Err(deadline_exceeded());
    }
    Ok(values)
}

/// Builtins rebuilt on top of `resume_watched` and `rethrow_expired`.
const WATCHED_BUILTINS: &str = r#"
local resume, rethrow = ...
local create, pack, unpack = coroutine.create, table.pack, table.unpack
local raw_pcall, raw_xpcall = pcall, xpcall

coroutine.resume = resume
coroutine.wrap = function(f)
    local co = create(f)
    return function(...)
        local res = pack(resume(co, ...))
        if res[1] then
            return unpack(res, 2, res.n)
        end
        error(res[2], 0)
    end
end

pcall = function(...) return rethrow(raw_pcall(...)) end
xpcall = function(...) return rethrow(raw_xpcall(...)) end
"#;

/// A Lua array: serializes as a JSON array even when empty.
fn array<T: IntoLua>(lua: &Lua, items: impl IntoIterator<Item = T>) -> LuaResult<LuaTable> {
    let table = lua.create_sequence_from(items)?;
    table.set_metatable(Some(lua.array_metatable()));
    Ok(table)
}

// ── LuaResponse ───────────────────────────────────────────────────────────────

/// A [`Response`] as Lua userdata.
pub struct LuaResponse(pub Response);

impl LuaUserData for LuaResponse {
    fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("status", |_, this| Ok(this.0.status()));
        fields.add_field_method_get("data", |_, this| Ok(this.0.data().to_owned()));
    }

    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("json", |lua, this, ()| {
            let value = this.0.json().map_err(LuaError::external)?;
            lua.to_value(&value)
        });
        methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| {
            Ok(format!("Response({})", this.0.status()))
        });
    }
}

// ── LuaClient ─────────────────────────────────────────────────────────────────

/// The HTTP client facade as Lua userdata, bound to the `client` global.
pub struct LuaClient {
    client: Arc<dyn HttpClient>,
}

impl LuaClient {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }
}

impl LuaUserData for LuaClient {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        // client:get(path) → Response
        methods.add_async_method("get", |_, this, path: String| async move {
            let client = Arc::clone(&this.client);
            let response = client.get(&path).await.map_err(LuaError::external)?;
            Ok(LuaResponse(response))
        });

        // client:get_all({path, ...}) → {Response, ...}
        methods.add_async_method("get_all", |lua, this, paths: Vec<String>| async move {
            let client = Arc::clone(&this.client);
            let responses = try_join_all(paths.iter().map(|p| client.get(p)))
                .await
                .map_err(LuaError::external)?;
            array(&lua, responses.into_iter().map(LuaResponse))
        });
    }
}

// ── API registration ──────────────────────────────────────────────────────────

/// Register the script API into a fresh state.
///
/// `script` is the name output lines are attributed to.
pub fn register_api(
    lua: &Lua,
    client: Arc<dyn HttpClient>,
    output: Arc<dyn OutputSink>,
    script: &str,
) -> LuaResult<()> {
    let globals = lua.globals();

    // No filesystem access from scripts.
    globals.raw_set("dofile", LuaNil)?;
    globals.raw_set("loadfile", LuaNil)?;

    // Resumed coroutines stay under the deadline hook.
    lua.load(WATCHED_BUILTINS)
        .set_name("=builtins")
        .call::<()>((
            lua.create_function(resume_watched)?,
            lua.create_function(rethrow_expired)?,
        ))?;

    globals.set("client", LuaClient::new(client))?;

    // print(...) → output sink
    {
        let name = script.to_owned();
        globals.set(
            "print",
            lua.create_function(move |lua, args: LuaMultiValue| {
                let tostring: LuaFunction = lua.globals().get("tostring")?;
                let parts = args
                    .into_iter()
                    .map(|v| tostring.call::<String>(v))
                    .collect::<LuaResult<Vec<_>>>()?;
                output.line(&name, &parts.join("\t"));
                Ok(())
            })?,
        )?;
    }

    // json.decode / json.encode
    {
        let json = lua.create_table()?;
        json.set(
            "decode",
            lua.create_function(|lua, text: String| {
                let value: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| LuaError::external(ClientError::Parse(e.to_string())))?;
                lua.to_value(&value)
            })?,
        )?;
        json.set(
            "encode",
            lua.create_function(|lua, value: LuaValue| {
                let value: serde_json::Value = lua.from_value(value)?;
                Ok(value.to_string())
            })?,
        )?;
        globals.set("json", json)?;
    }

    // join_all({fn, ...}) → {result, ...}
    globals.set(
        "join_all",
        lua.create_async_function(|lua, fns: Vec<LuaFunction>| async move {
            let values =
                try_join_all(fns.into_iter().map(|f| call_watched::<LuaValue>(&lua, f, ()))).await?;
            array(&lua, values)
        })?,
    )?;

    // sleep(ms [, value]) → value
    globals.set(
        "sleep",
        lua.create_async_function(|_, (ms, value): (u64, LuaValue)| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })?,
    )?;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
