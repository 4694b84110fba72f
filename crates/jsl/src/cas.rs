//! Content-addressable serialization.
//!
//! Values whose transitive contents are plain JSON serialize directly. As
//! soon as the graph contains a closure (and therefore an environment
//! chain), it serializes as a CAS document:
//!
//! ```json
//! { "__cas_version__": 1,
//!   "root": <value-or-reference>,
//!   "objects": { "<hash>": <object>, … } }
//! ```
//!
//! Closures become `{"__type__": "closure", params, body, env: ref}`,
//! environments `{"__type__": "env", bindings, parent?: ref}`, references
//! `{"__ref__": "<hash>"}`. The hash is SHA-256 over the node's canonical
//! form (sorted keys, child references inlined as hash strings). Recursive
//! closures make the value graph cyclic; back-edges hash as deterministic
//! stack-distance markers, so identical graphs always produce identical
//! documents and acyclic identical sub-graphs share storage.
//!
//! References into the prelude are never emitted: builtin values serialize
//! as name markers re-resolved from the registry, and the deserializer
//! re-attaches the local prelude as the final ancestor of every top-level
//! environment.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use sha2::{Digest, Sha256};

use crate::{
    budget::Budget,
    bytecode::{Code, Frame, TryFrame, VmState},
    env::Env,
    error::{Error, RunResult},
    value::{Closure, ObjectMap, Value},
};

/// Version tag of the CAS wrapper.
pub const CAS_VERSION: u64 = 1;
/// Wrapper key carrying the version.
pub const CAS_VERSION_KEY: &str = "__cas_version__";
/// Reference form key.
pub const REF_KEY: &str = "__ref__";
/// Type marker key for closure/env/builtin records.
pub const TYPE_KEY: &str = "__type__";
/// Marker key for paused-machine documents.
pub const PAUSED_KEY: &str = "__jsl_paused__";

/// Serializes a value: direct JSON when the graph is closure-free, the CAS
/// wrapper otherwise.
///
/// # Errors
/// Returns `TypeError` for values with no serialized form (non-finite
/// floats).
pub fn serialize(value: &Value) -> RunResult<serde_json::Value> {
    if !value.needs_cas() {
        return value.to_json();
    }
    let mut writer = CasWriter::default();
    let root = writer.enc_value(value)?;
    let mut doc = serde_json::Map::with_capacity(3);
    doc.insert(CAS_VERSION_KEY.to_string(), serde_json::Value::from(CAS_VERSION));
    doc.insert("root".to_string(), root);
    doc.insert("objects".to_string(), serde_json::Value::Object(writer.objects));
    Ok(serde_json::Value::Object(doc))
}

/// Deserializes either form, re-binding builtins from the registry and
/// re-attaching `prelude` as the final ancestor of every environment chain.
pub fn deserialize(prelude: &Rc<Env>, json: &serde_json::Value) -> RunResult<Value> {
    let Some(doc) = json.as_object().filter(|m| m.contains_key(CAS_VERSION_KEY)) else {
        return Value::from_json(json);
    };
    let version = doc.get(CAS_VERSION_KEY).and_then(serde_json::Value::as_u64);
    if version != Some(CAS_VERSION) {
        return Err(Error::syntax(format!("unsupported CAS version: {version:?}")));
    }
    let root = doc
        .get("root")
        .ok_or_else(|| Error::syntax("CAS document has no root"))?;
    let objects = match doc.get("objects") {
        Some(serde_json::Value::Object(map)) => map,
        _ => return Err(Error::syntax("CAS document has no objects table")),
    };
    let mut reader = CasReader {
        objects,
        prelude,
        envs: AHashMap::new(),
        closures: AHashMap::new(),
        building: AHashSet::new(),
    };
    reader.build_all()?;
    reader.dec_value(root)
}

// --- Writing ---

#[derive(Default)]
struct CasWriter {
    objects: serde_json::Map<String, serde_json::Value>,
    env_hashes: AHashMap<*const Env, String>,
    closure_hashes: AHashMap<*const Closure, String>,
    /// Traversal stack of node addresses, for cycle back-edge markers.
    stack: Vec<usize>,
    /// Nodes whose stored object has been emitted.
    stored: AHashSet<String>,
}

impl CasWriter {
    /// Encodes a value for the `root`, a binding slot, or a nested
    /// container. Closures leave a reference; everything else inlines.
    fn enc_value(&mut self, value: &Value) -> RunResult<serde_json::Value> {
        match value {
            Value::Closure(closure) => {
                let hash = self.hash_closure(closure)?;
                self.store_closure(closure, &hash)?;
                Ok(reference(&hash))
            }
            Value::Builtin(def) => Ok(builtin_marker(def.name)),
            Value::List(items) => {
                let items = items.iter().map(|v| self.enc_value(v)).collect::<RunResult<Vec<_>>>()?;
                Ok(serde_json::Value::Array(items))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, value) in map.iter() {
                    out.insert(key.clone(), self.enc_value(value)?);
                }
                Ok(serde_json::Value::Object(out))
            }
            plain => plain.to_json(),
        }
    }

    /// Hash pass for a closure node. A node currently on the traversal
    /// stack (a back-edge) yields its stack-distance marker instead.
    fn hash_closure(&mut self, closure: &Rc<Closure>) -> RunResult<String> {
        let addr = Rc::as_ptr(closure);
        if let Some(hash) = self.closure_hashes.get(&addr) {
            return Ok(hash.clone());
        }
        if let Some(marker) = self.cycle_marker(addr as usize) {
            return Ok(marker);
        }
        self.stack.push(addr as usize);
        let canon = {
            let params: Vec<serde_json::Value> = closure
                .params
                .iter()
                .map(|p| serde_json::Value::String(p.to_string()))
                .collect();
            let body = self.canon_value(&closure.body)?;
            let env = self.hash_env(&closure.env)?;
            let mut map = serde_json::Map::with_capacity(4);
            map.insert(TYPE_KEY.to_string(), serde_json::Value::String("closure".into()));
            map.insert("body".to_string(), body);
            map.insert("env".to_string(), serde_json::Value::String(env));
            map.insert("params".to_string(), serde_json::Value::Array(params));
            serde_json::Value::Object(map)
        };
        self.stack.pop();
        let hash = digest(&canon);
        self.closure_hashes.insert(addr, hash.clone());
        Ok(hash)
    }

    /// Hash pass for an environment node. The prelude hashes to a fixed
    /// marker and is never stored.
    fn hash_env(&mut self, env: &Rc<Env>) -> RunResult<String> {
        if env.is_frozen() {
            return Ok("prelude".to_string());
        }
        let addr = Rc::as_ptr(env);
        if let Some(hash) = self.env_hashes.get(&addr) {
            return Ok(hash.clone());
        }
        if let Some(marker) = self.cycle_marker(addr as usize) {
            return Ok(marker);
        }
        self.stack.push(addr as usize);
        let canon = {
            let mut names = Vec::new();
            env.for_each_local(|name, _| names.push(name.to_string()));
            names.sort_unstable();
            let mut bindings = serde_json::Map::with_capacity(names.len());
            for name in names {
                let value = env.get_local(&name).expect("binding enumerated above");
                bindings.insert(name, self.canon_value(&value)?);
            }
            let mut map = serde_json::Map::with_capacity(3);
            map.insert(TYPE_KEY.to_string(), serde_json::Value::String("env".into()));
            map.insert("bindings".to_string(), serde_json::Value::Object(bindings));
            if let Some(parent) = env.parent().filter(|p| !p.is_frozen()) {
                let parent = Rc::clone(parent);
                map.insert(
                    "parent".to_string(),
                    serde_json::Value::String(self.hash_env(&parent)?),
                );
            }
            serde_json::Value::Object(map)
        };
        self.stack.pop();
        let hash = digest(&canon);
        self.env_hashes.insert(addr, hash.clone());
        Ok(hash)
    }

    /// Canonical hashing form of a value: like `enc_value` but with child
    /// node hashes inlined as strings.
    fn canon_value(&mut self, value: &Value) -> RunResult<serde_json::Value> {
        match value {
            Value::Closure(closure) => {
                let hash = self.hash_closure(closure)?;
                Ok(serde_json::Value::String(format!("closure:{hash}")))
            }
            Value::Builtin(def) => Ok(serde_json::Value::String(format!("builtin:{}", def.name))),
            Value::List(items) => {
                let items = items.iter().map(|v| self.canon_value(v)).collect::<RunResult<Vec<_>>>()?;
                Ok(serde_json::Value::Array(items))
            }
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort_unstable();
                let mut out = serde_json::Map::with_capacity(map.len());
                for key in keys {
                    out.insert(key.clone(), self.canon_value(&map[key.as_str()])?);
                }
                Ok(serde_json::Value::Object(out))
            }
            plain => plain.to_json(),
        }
    }

    fn cycle_marker(&self, addr: usize) -> Option<String> {
        self.stack
            .iter()
            .rev()
            .position(|a| *a == addr)
            .map(|distance| format!("!cycle:{distance}"))
    }

    /// Store pass: emits the stored object for a closure and everything it
    /// references. All hashes are memoized by the time this runs.
    fn store_closure(&mut self, closure: &Rc<Closure>, hash: &str) -> RunResult<()> {
        if !self.stored.insert(hash.to_string()) {
            return Ok(());
        }
        let params: Vec<serde_json::Value> = closure
            .params
            .iter()
            .map(|p| serde_json::Value::String(p.to_string()))
            .collect();
        let body = self.enc_value(&closure.body)?;
        let env_hash = self.hash_env(&closure.env)?;
        self.store_env(&closure.env, &env_hash)?;

        let mut map = serde_json::Map::with_capacity(4);
        map.insert(TYPE_KEY.to_string(), serde_json::Value::String("closure".into()));
        map.insert("params".to_string(), serde_json::Value::Array(params));
        map.insert("body".to_string(), body);
        map.insert("env".to_string(), reference(&env_hash));
        self.objects.insert(hash.to_string(), serde_json::Value::Object(map));
        Ok(())
    }

    fn store_env(&mut self, env: &Rc<Env>, hash: &str) -> RunResult<()> {
        if env.is_frozen() || !self.stored.insert(hash.to_string()) {
            return Ok(());
        }
        let mut names = Vec::new();
        env.for_each_local(|name, _| names.push(name.to_string()));
        names.sort_unstable();
        let mut bindings = serde_json::Map::with_capacity(names.len());
        for name in names {
            let value = env.get_local(&name).expect("binding enumerated above");
            bindings.insert(name, self.enc_value(&value)?);
        }
        let mut map = serde_json::Map::with_capacity(3);
        map.insert(TYPE_KEY.to_string(), serde_json::Value::String("env".into()));
        map.insert("bindings".to_string(), serde_json::Value::Object(bindings));
        if let Some(parent) = env.parent().filter(|p| !p.is_frozen()) {
            let parent = Rc::clone(parent);
            let parent_hash = self.hash_env(&parent)?;
            self.store_env(&parent, &parent_hash)?;
            map.insert("parent".to_string(), reference(&parent_hash));
        }
        self.objects.insert(hash.to_string(), serde_json::Value::Object(map));
        Ok(())
    }
}

fn reference(hash: &str) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(REF_KEY.to_string(), serde_json::Value::String(hash.to_string()));
    serde_json::Value::Object(map)
}

fn builtin_marker(name: &str) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(2);
    map.insert(TYPE_KEY.to_string(), serde_json::Value::String("builtin".into()));
    map.insert("name".to_string(), serde_json::Value::String(name.to_string()));
    serde_json::Value::Object(map)
}

/// SHA-256 hex of the canonical JSON rendering.
fn digest(canon: &serde_json::Value) -> String {
    use std::fmt::Write;

    let rendered = serde_json::to_string(canon).expect("canonical form is valid JSON");
    let mut hasher = Sha256::new();
    hasher.update(rendered.as_bytes());
    let bytes = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String cannot fail");
    }
    out
}

// --- Reading ---

struct CasReader<'a> {
    objects: &'a serde_json::Map<String, serde_json::Value>,
    prelude: &'a Rc<Env>,
    envs: AHashMap<String, Rc<Env>>,
    closures: AHashMap<String, Rc<Closure>>,
    building: AHashSet<String>,
}

impl CasReader<'_> {
    /// Three-phase reconstruction: environment shells in parent order, then
    /// closures over the shells, then binding back-patch, which is what
    /// lets a recursive closure find itself.
    fn build_all(&mut self) -> RunResult<()> {
        for (hash, entry) in self.objects {
            match node_type(entry) {
                Some("env") => {
                    self.build_env(hash)?;
                }
                Some("closure") => {}
                _ => {
                    return Err(Error::syntax(format!("CAS object {hash} has unknown type")));
                }
            }
        }
        for (hash, entry) in self.objects {
            if node_type(entry) == Some("closure") {
                self.build_closure(hash)?;
            }
        }
        // Back-patch bindings now that every closure exists.
        for (hash, entry) in self.objects {
            if node_type(entry) != Some("env") {
                continue;
            }
            let env = Rc::clone(&self.envs[hash.as_str()]);
            let bindings = entry
                .get("bindings")
                .and_then(serde_json::Value::as_object)
                .ok_or_else(|| Error::syntax(format!("env {hash} has no bindings table")))?;
            for (name, value_json) in bindings {
                let value = self.dec_value(value_json)?;
                env.define(name.as_str(), value)?;
            }
        }
        Ok(())
    }

    fn build_env(&mut self, hash: &str) -> RunResult<Rc<Env>> {
        if let Some(env) = self.envs.get(hash) {
            return Ok(Rc::clone(env));
        }
        if !self.building.insert(format!("env:{hash}")) {
            return Err(Error::syntax(format!("cyclic environment parent chain at {hash}")));
        }
        let entry = self
            .objects
            .get(hash)
            .ok_or_else(|| Error::syntax(format!("dangling reference {hash}")))?;
        let parent = match entry.get("parent") {
            Some(parent_ref) => {
                let parent_hash = ref_hash(parent_ref)
                    .ok_or_else(|| Error::syntax(format!("env {hash} has a malformed parent reference")))?;
                self.build_env(parent_hash)?
            }
            // The local prelude is the final ancestor of every chain.
            None => Rc::clone(self.prelude),
        };
        let env = Env::child(&parent);
        self.building.remove(&format!("env:{hash}"));
        self.envs.insert(hash.to_string(), Rc::clone(&env));
        Ok(env)
    }

    fn build_closure(&mut self, hash: &str) -> RunResult<Rc<Closure>> {
        if let Some(closure) = self.closures.get(hash) {
            return Ok(Rc::clone(closure));
        }
        if !self.building.insert(format!("closure:{hash}")) {
            return Err(Error::syntax(format!("cyclic closure body at {hash}")));
        }
        let entry = self
            .objects
            .get(hash)
            .ok_or_else(|| Error::syntax(format!("dangling reference {hash}")))?;
        let params = entry
            .get("params")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| Error::syntax(format!("closure {hash} has no params")))?
            .iter()
            .map(|p| {
                p.as_str()
                    .map(Rc::from)
                    .ok_or_else(|| Error::syntax(format!("closure {hash} has a non-string parameter")))
            })
            .collect::<RunResult<_>>()?;
        let body = self.dec_value(
            entry
                .get("body")
                .ok_or_else(|| Error::syntax(format!("closure {hash} has no body")))?,
        )?;
        let env_hash = entry
            .get("env")
            .and_then(ref_hash)
            .ok_or_else(|| Error::syntax(format!("closure {hash} has no env reference")))?;
        let env = self.build_env(env_hash)?;
        let closure = Rc::new(Closure::new(params, body, env));
        self.building.remove(&format!("closure:{hash}"));
        self.closures.insert(hash.to_string(), Rc::clone(&closure));
        Ok(closure)
    }

    fn dec_value(&mut self, json: &serde_json::Value) -> RunResult<Value> {
        match json {
            serde_json::Value::Object(map) => {
                if let Some(hash) = map.get(REF_KEY).and_then(serde_json::Value::as_str) {
                    let hash = hash.to_string();
                    return Ok(Value::Closure(self.build_closure(&hash)?));
                }
                if map.get(TYPE_KEY).and_then(serde_json::Value::as_str) == Some("builtin") {
                    let name = map
                        .get("name")
                        .and_then(serde_json::Value::as_str)
                        .ok_or_else(|| Error::syntax("builtin marker has no name"))?;
                    let def = crate::builtins::by_name(name)
                        .ok_or_else(|| Error::syntax(format!("unknown builtin {name:?}")))?;
                    return Ok(Value::Builtin(def));
                }
                let mut out = ObjectMap::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.dec_value(value)?);
                }
                Ok(Value::object(out))
            }
            serde_json::Value::Array(items) => {
                let items = items.iter().map(|v| self.dec_value(v)).collect::<RunResult<Vec<_>>>()?;
                Ok(Value::list(items))
            }
            plain => Value::from_json(plain),
        }
    }
}

fn node_type(entry: &serde_json::Value) -> Option<&str> {
    entry.get(TYPE_KEY).and_then(serde_json::Value::as_str)
}

fn ref_hash(json: &serde_json::Value) -> Option<&str> {
    json.get(REF_KEY).and_then(serde_json::Value::as_str)
}

// --- Paused-machine transport ---

/// Serializes a paused machine (state + budget) to a JSON document built on
/// the same CAS writer, so stacks, environments, and frames can carry
/// closures.
pub(crate) fn dump_state(state: &VmState, budget: &Budget) -> RunResult<serde_json::Value> {
    let mut writer = CasWriter::default();

    let enc_env = |writer: &mut CasWriter, env: &Rc<Env>| -> RunResult<serde_json::Value> {
        if env.is_frozen() {
            return Ok(serde_json::Value::String("prelude".to_string()));
        }
        let hash = writer.hash_env(env)?;
        writer.store_env(env, &hash)?;
        Ok(reference(&hash))
    };
    let enc_stack = |writer: &mut CasWriter, stack: &[Value]| -> RunResult<serde_json::Value> {
        let items = stack.iter().map(|v| writer.enc_value(v)).collect::<RunResult<Vec<_>>>()?;
        Ok(serde_json::Value::Array(items))
    };

    let mut frames = Vec::with_capacity(state.frames.len());
    for frame in &state.frames {
        frames.push(serde_json::json!({
            "stack": enc_stack(&mut writer, &frame.stack)?,
            "pc": frame.pc,
            "code": frame.code.to_json()?,
            "env": enc_env(&mut writer, &frame.env)?,
            "trys_len": frame.trys_len,
        }));
    }
    let mut trys = Vec::with_capacity(state.trys.len());
    for try_frame in &state.trys {
        trys.push(serde_json::json!({
            "handler_pc": try_frame.handler_pc,
            "stack_len": try_frame.stack_len,
            "env": enc_env(&mut writer, &try_frame.env)?,
            "frame_depth": try_frame.frame_depth,
        }));
    }

    let machine = serde_json::json!({
        "stack": enc_stack(&mut writer, &state.stack)?,
        "pc": state.pc,
        "code": state.code.to_json()?,
        "env": enc_env(&mut writer, &state.env)?,
        "frames": frames,
        "trys": trys,
    });

    let mut doc = serde_json::Map::with_capacity(4);
    doc.insert(PAUSED_KEY.to_string(), serde_json::Value::from(1u64));
    doc.insert("budget".to_string(), budget.dump());
    doc.insert("machine".to_string(), machine);
    doc.insert("objects".to_string(), serde_json::Value::Object(writer.objects));
    Ok(serde_json::Value::Object(doc))
}

/// Restores a paused machine from its [`dump_state`] document.
pub(crate) fn load_state(prelude: &Rc<Env>, json: &serde_json::Value) -> RunResult<(VmState, Budget)> {
    let doc = json
        .as_object()
        .filter(|m| m.contains_key(PAUSED_KEY))
        .ok_or_else(|| Error::syntax("not a paused-machine document"))?;
    let budget = Budget::load(
        doc.get("budget")
            .ok_or_else(|| Error::syntax("paused document has no budget"))?,
    )?;
    let machine = doc
        .get("machine")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| Error::syntax("paused document has no machine"))?;
    let objects = match doc.get("objects") {
        Some(serde_json::Value::Object(map)) => map,
        _ => return Err(Error::syntax("paused document has no objects table")),
    };

    let mut reader = CasReader {
        objects,
        prelude,
        envs: AHashMap::new(),
        closures: AHashMap::new(),
        building: AHashSet::new(),
    };
    reader.build_all()?;

    let dec_env = |reader: &mut CasReader<'_>, json: &serde_json::Value| -> RunResult<Rc<Env>> {
        if json.as_str() == Some("prelude") {
            return Ok(Rc::clone(reader.prelude));
        }
        let hash = ref_hash(json).ok_or_else(|| Error::syntax("malformed env reference"))?;
        reader
            .envs
            .get(hash)
            .map(Rc::clone)
            .ok_or_else(|| Error::syntax(format!("dangling env reference {hash}")))
    };
    let dec_stack = |reader: &mut CasReader<'_>, json: &serde_json::Value| -> RunResult<Vec<Value>> {
        json.as_array()
            .ok_or_else(|| Error::syntax("malformed value stack"))?
            .iter()
            .map(|v| reader.dec_value(v))
            .collect()
    };
    let get_usize = |map: &serde_json::Map<String, serde_json::Value>, key: &str| -> RunResult<usize> {
        map.get(key)
            .and_then(serde_json::Value::as_u64)
            .map(|v| usize::try_from(v).unwrap_or(usize::MAX))
            .ok_or_else(|| Error::syntax(format!("paused document missing {key}")))
    };

    let mut frames = Vec::new();
    for frame_json in machine
        .get("frames")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| Error::syntax("paused document has no frames"))?
    {
        let frame = frame_json
            .as_object()
            .ok_or_else(|| Error::syntax("malformed frame"))?;
        frames.push(Frame {
            stack: dec_stack(&mut reader, frame.get("stack").unwrap_or(&serde_json::Value::Null))?,
            pc: get_usize(frame, "pc")?,
            code: Rc::new(Code::from_json(
                frame.get("code").ok_or_else(|| Error::syntax("frame has no code"))?,
            )?),
            env: dec_env(&mut reader, frame.get("env").unwrap_or(&serde_json::Value::Null))?,
            trys_len: get_usize(frame, "trys_len")?,
        });
    }

    let mut trys = Vec::new();
    for try_json in machine
        .get("trys")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| Error::syntax("paused document has no try stack"))?
    {
        let try_frame = try_json
            .as_object()
            .ok_or_else(|| Error::syntax("malformed try frame"))?;
        trys.push(TryFrame {
            handler_pc: get_usize(try_frame, "handler_pc")?,
            stack_len: get_usize(try_frame, "stack_len")?,
            env: dec_env(&mut reader, try_frame.get("env").unwrap_or(&serde_json::Value::Null))?,
            frame_depth: get_usize(try_frame, "frame_depth")?,
        });
    }

    let state = VmState {
        stack: dec_stack(&mut reader, machine.get("stack").unwrap_or(&serde_json::Value::Null))?,
        pc: get_usize(machine, "pc")?,
        code: Rc::new(Code::from_json(
            machine.get("code").ok_or_else(|| Error::syntax("machine has no code"))?,
        )?),
        env: dec_env(&mut reader, machine.get("env").unwrap_or(&serde_json::Value::Null))?,
        frames,
        trys,
    };
    Ok((state, budget))
}
