//! The JPN instruction set and its JSON wire form.
//!
//! Internally a code block is a vector of typed [`Instr`]s with jump targets
//! in instruction indices. On the wire a block is a flat JSON array of
//! tokens, one or two tokens per instruction:
//!
//! - `null`, booleans, and non-integer numbers are literal pushes;
//! - `"@text"` pushes the literal string `text`; any other bare string is a
//!   variable reference, unless it is a reserved sentinel;
//! - a bare integer is always an immediate operand of the following token
//!   (`2, "+"` applies `+` to two arguments; `7, "JUMP"` jumps to token 7);
//!   integer literals and structured constants travel as `{"__lit__": …}`
//!   wrappers instead, which is what keeps the stream unambiguous;
//! - the remaining sentinels (`"LAMBDA"`, `"DEF"`, …) stand alone.
//!
//! Jump targets are rewritten between the two forms: instruction indices
//! inside, token indices outside.

use std::rc::Rc;

use strum::{Display, EnumString};

use crate::{
    error::{Error, RunResult},
    value::Value,
};

/// Wrapper key for constants that a bare token cannot carry.
pub const LIT_KEY: &str = "__lit__";

/// One JPN instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Push a constant.
    Const(Value),
    /// Resolve a variable in the current environment and push it.
    Load(Rc<str>),
    /// Apply the named operator to `argc` popped arguments.
    CallOp { argc: usize, name: Rc<str> },
    /// Pop `argc` arguments, then the callee, and apply it.
    Apply { argc: usize },
    /// Pop `pairs` key/value pairs and build an object.
    MakeDict { pairs: usize },
    /// Unconditional jump to an instruction index.
    Jump { target: usize },
    /// Pop the condition; jump when falsy.
    JumpIfFalse { target: usize },
    /// Pop body and parameter list, push a closure over the current
    /// environment.
    Lambda,
    /// Explicit frame return (blocks also return implicitly at their end).
    Ret,
    /// Pop name then value, bind in the current environment, push the value.
    Def,
    /// Pop name then value, bind in the current environment, push nothing.
    Bind,
    /// Enter a child scope.
    Enter,
    /// Leave the current scope.
    Exit,
    /// Discard the top of stack.
    Pop,
    /// Swap the two top stack entries.
    Swap,
    /// Install an error handler at the given instruction index.
    Try { handler: usize },
    /// Uninstall the innermost handler.
    EndTry,
    /// Pop `argc` arguments then the command string; dispatch to the host.
    Host { argc: usize },
    /// Pop the condition expression then the collection; filter it.
    Where,
    /// Pop `ops` op expressions then the data; run the pipeline.
    Transform { ops: usize },
}

/// Reserved sentinel tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
enum Sentinel {
    #[strum(serialize = "__apply__")]
    Apply,
    #[strum(serialize = "__dict__")]
    Dict,
    #[strum(serialize = "JUMP")]
    Jump,
    #[strum(serialize = "JUMP_IF_FALSE")]
    JumpIfFalse,
    #[strum(serialize = "LAMBDA")]
    Lambda,
    #[strum(serialize = "RET")]
    Ret,
    #[strum(serialize = "DEF")]
    Def,
    #[strum(serialize = "BIND")]
    Bind,
    #[strum(serialize = "ENTER")]
    Enter,
    #[strum(serialize = "EXIT")]
    Exit,
    #[strum(serialize = "POP")]
    Pop,
    #[strum(serialize = "SWAP")]
    Swap,
    #[strum(serialize = "TRY")]
    Try,
    #[strum(serialize = "END_TRY")]
    EndTry,
    #[strum(serialize = "HOST")]
    Host,
    #[strum(serialize = "WHERE")]
    Where,
    #[strum(serialize = "TRANSFORM")]
    Transform,
}

impl Instr {
    /// Short mnemonic used by tracing.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Const(_) => "const",
            Self::Load(_) => "load",
            Self::CallOp { .. } => "call-op",
            Self::Apply { .. } => "apply",
            Self::MakeDict { .. } => "dict",
            Self::Jump { .. } => "jump",
            Self::JumpIfFalse { .. } => "jump-if-false",
            Self::Lambda => "lambda",
            Self::Ret => "ret",
            Self::Def => "def",
            Self::Bind => "bind",
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::Pop => "pop",
            Self::Swap => "swap",
            Self::Try { .. } => "try",
            Self::EndTry => "end-try",
            Self::Host { .. } => "host",
            Self::Where => "where",
            Self::Transform { .. } => "transform",
        }
    }

    /// Number of JSON tokens this instruction occupies on the wire.
    fn token_width(&self) -> usize {
        match self {
            Self::Const(_)
            | Self::Load(_)
            | Self::Lambda
            | Self::Ret
            | Self::Def
            | Self::Bind
            | Self::Enter
            | Self::Exit
            | Self::Pop
            | Self::Swap
            | Self::EndTry
            | Self::Where => 1,
            Self::CallOp { .. }
            | Self::Apply { .. }
            | Self::MakeDict { .. }
            | Self::Jump { .. }
            | Self::JumpIfFalse { .. }
            | Self::Try { .. }
            | Self::Host { .. }
            | Self::Transform { .. } => 2,
        }
    }
}

/// A compiled block: the unit the VM executes and frames reference.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Code {
    instrs: Vec<Instr>,
}

impl Code {
    pub(crate) fn new(instrs: Vec<Instr>) -> Self {
        Self { instrs }
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// True when the block is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// The instruction at `pc`, if in range.
    #[must_use]
    pub fn get(&self, pc: usize) -> Option<&Instr> {
        self.instrs.get(pc)
    }

    /// The full instruction slice.
    #[must_use]
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Encodes this block as the flat JSON token array.
    ///
    /// # Errors
    /// Returns `TypeError` if a constant has no JSON form (cannot happen for
    /// compiler-produced code).
    pub fn to_json(&self) -> RunResult<serde_json::Value> {
        // First pass: token offset of every instruction, so jump targets can
        // be rewritten into token indices.
        let mut offsets = Vec::with_capacity(self.instrs.len() + 1);
        let mut offset = 0usize;
        for instr in &self.instrs {
            offsets.push(offset);
            offset += instr.token_width();
        }
        offsets.push(offset);

        let target_token = |target: usize| -> RunResult<serde_json::Value> {
            offsets
                .get(target)
                .map(|t| serde_json::Value::from(*t))
                .ok_or_else(|| Error::syntax(format!("jump target {target} out of range")))
        };

        let mut tokens = Vec::with_capacity(offset);
        for instr in &self.instrs {
            match instr {
                Instr::Const(value) => tokens.push(const_token(value)?),
                Instr::Load(name) => tokens.push(serde_json::Value::String(name.to_string())),
                Instr::CallOp { argc, name } => {
                    tokens.push(serde_json::Value::from(*argc));
                    tokens.push(serde_json::Value::String(name.to_string()));
                }
                Instr::Apply { argc } => {
                    tokens.push(serde_json::Value::from(*argc));
                    tokens.push(sentinel(Sentinel::Apply));
                }
                Instr::MakeDict { pairs } => {
                    tokens.push(serde_json::Value::from(*pairs));
                    tokens.push(sentinel(Sentinel::Dict));
                }
                Instr::Jump { target } => {
                    tokens.push(target_token(*target)?);
                    tokens.push(sentinel(Sentinel::Jump));
                }
                Instr::JumpIfFalse { target } => {
                    tokens.push(target_token(*target)?);
                    tokens.push(sentinel(Sentinel::JumpIfFalse));
                }
                Instr::Try { handler } => {
                    tokens.push(target_token(*handler)?);
                    tokens.push(sentinel(Sentinel::Try));
                }
                Instr::Host { argc } => {
                    tokens.push(serde_json::Value::from(*argc));
                    tokens.push(sentinel(Sentinel::Host));
                }
                Instr::Transform { ops } => {
                    tokens.push(serde_json::Value::from(*ops));
                    tokens.push(sentinel(Sentinel::Transform));
                }
                Instr::Lambda => tokens.push(sentinel(Sentinel::Lambda)),
                Instr::Ret => tokens.push(sentinel(Sentinel::Ret)),
                Instr::Def => tokens.push(sentinel(Sentinel::Def)),
                Instr::Bind => tokens.push(sentinel(Sentinel::Bind)),
                Instr::Enter => tokens.push(sentinel(Sentinel::Enter)),
                Instr::Exit => tokens.push(sentinel(Sentinel::Exit)),
                Instr::Pop => tokens.push(sentinel(Sentinel::Pop)),
                Instr::Swap => tokens.push(sentinel(Sentinel::Swap)),
                Instr::EndTry => tokens.push(sentinel(Sentinel::EndTry)),
                Instr::Where => tokens.push(sentinel(Sentinel::Where)),
            }
        }
        Ok(serde_json::Value::Array(tokens))
    }

    /// Decodes a JSON token array back into a code block.
    ///
    /// # Errors
    /// Returns `Syntax` on malformed streams: an immediate integer with no
    /// following word, a jump target between instruction boundaries, or a
    /// token shape outside the grammar.
    pub fn from_json(json: &serde_json::Value) -> RunResult<Self> {
        let tokens = json
            .as_array()
            .ok_or_else(|| Error::syntax("bytecode: expected a JSON array of tokens"))?;

        let mut instrs = Vec::with_capacity(tokens.len());
        // token index of each decoded instruction start, for target fixup
        let mut instr_at_token = vec![usize::MAX; tokens.len() + 1];
        // (instr index, token target) pairs patched after the scan
        let mut fixups: Vec<(usize, usize)> = Vec::new();

        let mut pos = 0usize;
        while pos < tokens.len() {
            instr_at_token[pos] = instrs.len();
            let token = &tokens[pos];
            match token {
                serde_json::Value::Number(n) if n.is_i64() && n.as_i64().is_some_and(|i| i >= 0) => {
                    let immediate = usize::try_from(n.as_i64().unwrap_or_default())
                        .map_err(|_| Error::syntax("bytecode: negative immediate"))?;
                    let Some(word) = tokens.get(pos + 1).and_then(serde_json::Value::as_str) else {
                        return Err(Error::syntax(format!(
                            "bytecode: immediate {immediate} at token {pos} has no following word"
                        )));
                    };
                    let instr = match word.parse::<Sentinel>() {
                        Ok(Sentinel::Apply) => Instr::Apply { argc: immediate },
                        Ok(Sentinel::Dict) => Instr::MakeDict { pairs: immediate },
                        Ok(Sentinel::Host) => Instr::Host { argc: immediate },
                        Ok(Sentinel::Transform) => Instr::Transform { ops: immediate },
                        Ok(Sentinel::Jump) => {
                            fixups.push((instrs.len(), immediate));
                            Instr::Jump { target: usize::MAX }
                        }
                        Ok(Sentinel::JumpIfFalse) => {
                            fixups.push((instrs.len(), immediate));
                            Instr::JumpIfFalse { target: usize::MAX }
                        }
                        Ok(Sentinel::Try) => {
                            fixups.push((instrs.len(), immediate));
                            Instr::Try { handler: usize::MAX }
                        }
                        Ok(other) => {
                            return Err(Error::syntax(format!(
                                "bytecode: sentinel {other} does not take an immediate"
                            )));
                        }
                        Err(_) if !word.starts_with('@') => Instr::CallOp {
                            argc: immediate,
                            name: Rc::from(word),
                        },
                        Err(_) => {
                            return Err(Error::syntax(format!(
                                "bytecode: literal {word:?} cannot follow an immediate"
                            )));
                        }
                    };
                    instrs.push(instr);
                    pos += 2;
                }
                serde_json::Value::String(s) => {
                    let instr = match s.parse::<Sentinel>() {
                        Ok(Sentinel::Lambda) => Instr::Lambda,
                        Ok(Sentinel::Ret) => Instr::Ret,
                        Ok(Sentinel::Def) => Instr::Def,
                        Ok(Sentinel::Bind) => Instr::Bind,
                        Ok(Sentinel::Enter) => Instr::Enter,
                        Ok(Sentinel::Exit) => Instr::Exit,
                        Ok(Sentinel::Pop) => Instr::Pop,
                        Ok(Sentinel::Swap) => Instr::Swap,
                        Ok(Sentinel::EndTry) => Instr::EndTry,
                        Ok(Sentinel::Where) => Instr::Where,
                        Ok(other) => {
                            return Err(Error::syntax(format!(
                                "bytecode: sentinel {other} requires a preceding immediate"
                            )));
                        }
                        Err(_) => match s.strip_prefix('@') {
                            Some(literal) => Instr::Const(Value::str(literal)),
                            None => Instr::Load(Rc::from(s.as_str())),
                        },
                    };
                    instrs.push(instr);
                    pos += 1;
                }
                serde_json::Value::Object(map) if map.len() == 1 && map.contains_key(LIT_KEY) => {
                    let value = Value::from_json(&map[LIT_KEY])?;
                    instrs.push(Instr::Const(value));
                    pos += 1;
                }
                serde_json::Value::Null | serde_json::Value::Bool(_) => {
                    instrs.push(Instr::Const(Value::from_json(token)?));
                    pos += 1;
                }
                serde_json::Value::Number(_) => {
                    // Non-integer (or negative) number: a float literal.
                    instrs.push(Instr::Const(Value::from_json(token)?));
                    pos += 1;
                }
                other => {
                    return Err(Error::syntax(format!("bytecode: unexpected token {other}")));
                }
            }
        }
        instr_at_token[tokens.len()] = instrs.len();

        for (instr_index, token_target) in fixups {
            let target = instr_at_token
                .get(token_target)
                .copied()
                .filter(|t| *t != usize::MAX)
                .ok_or_else(|| Error::syntax(format!("bytecode: jump target {token_target} is not an instruction boundary")))?;
            match &mut instrs[instr_index] {
                Instr::Jump { target: t } | Instr::JumpIfFalse { target: t } | Instr::Try { handler: t } => {
                    *t = target;
                }
                _ => unreachable!("fixup recorded for non-jump"),
            }
        }

        Ok(Self { instrs })
    }
}

fn sentinel(s: Sentinel) -> serde_json::Value {
    serde_json::Value::String(s.to_string())
}

/// Encodes a constant as one token.
fn const_token(value: &Value) -> RunResult<serde_json::Value> {
    match value {
        Value::Null | Value::Bool(_) | Value::Float(_) => value.to_json(),
        Value::Str(s) => Ok(serde_json::Value::String(format!("@{s}"))),
        other => {
            let mut map = serde_json::Map::with_capacity(1);
            map.insert(LIT_KEY.to_string(), other.to_json()?);
            Ok(serde_json::Value::Object(map))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(instrs: Vec<Instr>) {
        let code = Code::new(instrs);
        let json = code.to_json().unwrap();
        let back = Code::from_json(&json).unwrap();
        assert_eq!(code, back, "wire form: {json}");
    }

    #[test]
    fn scalar_and_symbol_tokens() {
        round_trip(vec![
            Instr::Const(Value::Null),
            Instr::Const(Value::Bool(true)),
            Instr::Const(Value::Float(2.5)),
            Instr::Const(Value::Int(7)),
            Instr::Const(Value::str("hi")),
            Instr::Load(Rc::from("x")),
            Instr::CallOp { argc: 2, name: Rc::from("+") },
        ]);
    }

    #[test]
    fn jump_targets_survive_width_changes() {
        // The CallOp before the jump is two tokens wide, so instruction and
        // token indices diverge.
        round_trip(vec![
            Instr::Load(Rc::from("x")),
            Instr::CallOp { argc: 1, name: Rc::from("not") },
            Instr::JumpIfFalse { target: 4 },
            Instr::Const(Value::Int(1)),
            Instr::Const(Value::Int(2)),
        ]);
    }

    #[test]
    fn jump_to_end_is_valid() {
        round_trip(vec![Instr::Jump { target: 1 }]);
    }

    #[test]
    fn integer_literal_never_reads_as_arity() {
        // `1` then a variable reference: without the wrapper this would
        // decode as a unary application of `x`.
        let code = Code::new(vec![
            Instr::Const(Value::Int(1)),
            Instr::Load(Rc::from("x")),
            Instr::CallOp { argc: 2, name: Rc::from("+") },
        ]);
        let json = code.to_json().unwrap();
        assert_eq!(Code::from_json(&json).unwrap(), code);
    }

    #[test]
    fn dangling_immediate_is_rejected() {
        let json = serde_json::json!([2]);
        assert!(Code::from_json(&json).is_err());
    }

    #[test]
    fn misaligned_jump_target_is_rejected() {
        // Token 1 is the middle of the jump's own two-token encoding.
        let json = serde_json::json!([1, "JUMP"]);
        assert!(Code::from_json(&json).is_err());
    }
}
