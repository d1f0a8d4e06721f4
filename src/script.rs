//! Whitelisted instruction set that synthesized code is lowered into.
//!
//! Model output is written in a Playwright-flavoured statement syntax
//! (`await page.getByText('Enviar').click();`). The grammar in `script.pest`
//! only recognizes awaited call chains; lowering then accepts the calls it
//! knows and rejects the whole program on anything else, so nothing the model
//! writes is ever evaluated as code. Templates and
//! heuristics build [`Instruction`]s directly.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl LoadState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "load" => Some(LoadState::Load),
            "domcontentloaded" => Some(LoadState::DomContentLoaded),
            "networkidle" => Some(LoadState::NetworkIdle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Load => "load",
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

/// How an element is located on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Visible text equal to the value (whitespace-normalized, case-insensitive).
    Text(String),
    /// ARIA role, optionally filtered by accessible name.
    Role { role: String, name: Option<String> },
    Placeholder(String),
    Label(String),
    /// CSS selector, optionally filtered by contained text.
    Css {
        selector: String,
        has_text: Option<String>,
    },
}

impl Target {
    pub fn css(selector: impl Into<String>) -> Self {
        Target::Css {
            selector: selector.into(),
            has_text: None,
        }
    }

    pub fn css_with_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Target::Css {
            selector: selector.into(),
            has_text: Some(text.into()),
        }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Target::Role {
            role: role.into(),
            name: Some(name.into()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Text(text) => write!(f, "getByText({})", quote(text)),
            Target::Role {
                role,
                name: Some(name),
            } => write!(f, "getByRole({}, {{ name: {} }})", quote(role), quote(name)),
            Target::Role { role, name: None } => write!(f, "getByRole({})", quote(role)),
            Target::Placeholder(text) => write!(f, "getByPlaceholder({})", quote(text)),
            Target::Label(text) => write!(f, "getByLabel({})", quote(text)),
            Target::Css {
                selector,
                has_text: None,
            } => write!(f, "locator({})", quote(selector)),
            Target::Css {
                selector,
                has_text: Some(text),
            } => write!(
                f,
                "locator({}).filter({{ hasText: {} }})",
                quote(selector),
                quote(text)
            ),
        }
    }
}

/// One whitelisted action. Target lists are tried in order; the first target
/// that succeeds wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Navigate(String),
    WaitForLoad(LoadState),
    Wait(u64),
    WaitForSelector(String),
    WaitFor(Vec<Target>),
    Click(Vec<Target>),
    Fill(Vec<Target>, String),
    /// Keyboard press; when targets are given the element is clicked first.
    Press { targets: Vec<Target>, key: String },
    Extract(Vec<Target>),
    ReadTitle,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Navigate(url) => write!(f, "await page.goto({});", quote(url)),
            Instruction::WaitForLoad(state) => {
                write!(f, "await page.waitForLoadState({});", quote(state.as_str()))
            }
            Instruction::Wait(ms) => write!(f, "await page.waitForTimeout({ms});"),
            Instruction::WaitForSelector(selector) => {
                write!(f, "await page.waitForSelector({});", quote(selector))
            }
            Instruction::WaitFor(targets) => {
                write!(f, "await page.{}.waitFor();", chain(targets))
            }
            Instruction::Click(targets) => write!(f, "await page.{}.click();", chain(targets)),
            Instruction::Fill(targets, text) => {
                write!(f, "await page.{}.fill({});", chain(targets), quote(text))
            }
            Instruction::Press { targets, key } if targets.is_empty() => {
                write!(f, "await page.keyboard.press({});", quote(key))
            }
            Instruction::Press { targets, key } => {
                write!(f, "await page.{}.press({});", chain(targets), quote(key))
            }
            Instruction::Extract(targets) => {
                write!(f, "await page.{}.textContent();", chain(targets))
            }
            Instruction::ReadTitle => f.write_str("await page.title();"),
        }
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn chain(targets: &[Target]) -> String {
    let mut out = String::new();
    for (i, target) in targets.iter().enumerate() {
        if i == 0 {
            out.push_str(&target.to_string());
        } else {
            out.push_str(&format!(".or(page.{target})"));
        }
    }
    out
}

#[derive(Debug, Error, PartialEq)]
pub enum ScriptError {
    #[error("program does not parse: {0}")]
    Grammar(#[from] pest::error::Error<Rule>),

    #[error("statement is not awaited: `{0}`")]
    NotAwaited(String),

    #[error("syntax error in `{statement}`: {reason}")]
    Syntax { statement: String, reason: String },

    #[error("unsupported call `{call}` in `{statement}`")]
    Unsupported { statement: String, call: String },

    #[error("program has no statements")]
    Empty,
}

#[derive(Parser)]
#[grammar = "script.pest"]
pub struct ScriptParser;

/// Parse cleaned model output into a program.
pub fn parse_program(code: &str) -> Result<Vec<Instruction>, ScriptError> {
    let program = ScriptParser::parse(Rule::program, code)?
        .next()
        .ok_or(ScriptError::Empty)?;

    let mut instructions = Vec::new();
    for pair in program.into_inner() {
        if pair.as_rule() == Rule::statement {
            instructions.push(parse_statement(pair)?);
        }
    }
    if instructions.is_empty() {
        return Err(ScriptError::Empty);
    }
    Ok(instructions)
}

fn parse_statement(pair: Pair<'_, Rule>) -> Result<Instruction, ScriptError> {
    let lowering = Lowering {
        statement: pair.as_str().trim(),
    };
    let mut awaited = false;
    let mut chain = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::await_kw => awaited = true,
            Rule::chain => chain = Some(inner),
            _ => {}
        }
    }
    if !awaited {
        return Err(ScriptError::NotAwaited(lowering.statement.to_string()));
    }
    let chain = chain.ok_or_else(|| lowering.syntax("expected a call chain"))?;
    let calls = lowering.page_chain(chain)?;
    lowering.lower(&calls)
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    /// Booleans only appear in option objects and are ignored.
    Bool,
    Object(Vec<(String, Value)>),
    Chain(Vec<Call>),
}

#[derive(Debug, Clone, PartialEq)]
struct Call {
    name: String,
    /// `None` for property access such as `page.keyboard`.
    args: Option<Vec<Value>>,
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

struct Lowering<'a> {
    statement: &'a str,
}

impl Lowering<'_> {
    fn syntax(&self, reason: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            statement: self.statement.to_string(),
            reason: reason.into(),
        }
    }

    fn unsupported(&self, call: &str) -> ScriptError {
        ScriptError::Unsupported {
            statement: self.statement.to_string(),
            call: call.to_string(),
        }
    }

    /// Calls hanging off `page`. Any other head is rejected.
    fn page_chain(&self, pair: Pair<'_, Rule>) -> Result<Vec<Call>, ScriptError> {
        let mut inner = pair.into_inner();
        let head = inner.next().map(|p| p.as_str()).unwrap_or_default();
        if head != "page" {
            return Err(self.unsupported(head));
        }
        inner.map(|member| self.call(member)).collect()
    }

    fn call(&self, member: Pair<'_, Rule>) -> Result<Call, ScriptError> {
        let mut inner = member.into_inner();
        let name = inner
            .next()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();
        let args = match inner.next() {
            Some(args) => Some(
                args.into_inner()
                    .map(|value| self.value(value))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };
        Ok(Call { name, args })
    }

    fn value(&self, pair: Pair<'_, Rule>) -> Result<Value, ScriptError> {
        match pair.as_rule() {
            Rule::string => self.string(pair).map(Value::Str),
            Rule::number => {
                let raw = pair.as_str().replace('_', "");
                raw.parse::<f64>()
                    .map(Value::Num)
                    .map_err(|_| self.syntax(format!("invalid number `{raw}`")))
            }
            Rule::boolean => Ok(Value::Bool),
            Rule::object => {
                let mut fields = Vec::new();
                for field in pair.into_inner() {
                    let mut parts = field.into_inner();
                    let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                        return Err(self.syntax("incomplete object field"));
                    };
                    let key = match key.as_rule() {
                        Rule::string => self.string(key)?,
                        _ => key.as_str().to_string(),
                    };
                    fields.push((key, self.value(value)?));
                }
                Ok(Value::Object(fields))
            }
            Rule::chain => self.page_chain(pair).map(Value::Chain),
            other => Err(self.syntax(format!("unexpected {other:?}"))),
        }
    }

    fn string(&self, pair: Pair<'_, Rule>) -> Result<String, ScriptError> {
        let Some(body) = pair.into_inner().next() else {
            return Ok(String::new());
        };
        if body.as_rule() == Rule::template && body.as_str().contains("${") {
            return Err(self.unsupported("template interpolation"));
        }
        Ok(unescape(body.as_str()))
    }

    fn lower(&self, calls: &[Call]) -> Result<Instruction, ScriptError> {
        let Some(first) = calls.first() else {
            return Err(self.syntax("bare page reference"));
        };
        let instruction = match first.name.as_str() {
            "goto" => Instruction::Navigate(self.str_arg(first, 0)?),
            "waitForLoadState" => {
                let state = match self.opt_str_arg(first, 0)? {
                    None => LoadState::Load,
                    Some(raw) => LoadState::parse(&raw).ok_or_else(|| self.unsupported(&raw))?,
                };
                Instruction::WaitForLoad(state)
            }
            "waitForTimeout" => Instruction::Wait(self.num_arg(first, 0)?),
            "waitForSelector" => Instruction::WaitForSelector(self.str_arg(first, 0)?),
            "title" => {
                self.call_args(first)?;
                Instruction::ReadTitle
            }
            "click" => Instruction::Click(vec![Target::css(self.str_arg(first, 0)?)]),
            "fill" | "type" => Instruction::Fill(
                vec![Target::css(self.str_arg(first, 0)?)],
                self.str_arg(first, 1)?,
            ),
            "textContent" | "innerText" => {
                Instruction::Extract(vec![Target::css(self.str_arg(first, 0)?)])
            }
            "keyboard" => {
                return match &calls[1..] {
                    [press] if press.name == "press" => Ok(Instruction::Press {
                        targets: Vec::new(),
                        key: self.str_arg(press, 0)?,
                    }),
                    [other, ..] => Err(self.unsupported(&format!("keyboard.{}", other.name))),
                    [] => Err(self.syntax("bare keyboard reference")),
                };
            }
            _ => {
                let (targets, rest) = self.locator(calls)?;
                return self.action(targets, rest);
            }
        };
        match calls.get(1) {
            Some(extra) => Err(self.unsupported(&extra.name)),
            None => Ok(instruction),
        }
    }

    fn locator<'c>(&self, calls: &'c [Call]) -> Result<(Vec<Target>, &'c [Call]), ScriptError> {
        let Some(first) = calls.first() else {
            return Err(self.syntax("empty locator"));
        };
        let mut target = match first.name.as_str() {
            "getByText" => Target::Text(self.str_arg(first, 0)?),
            "getByRole" => Target::Role {
                role: self.str_arg(first, 0)?,
                name: self.object_str(first, 1, "name")?,
            },
            "getByPlaceholder" => Target::Placeholder(self.str_arg(first, 0)?),
            "getByLabel" => Target::Label(self.str_arg(first, 0)?),
            "locator" => Target::css(self.str_arg(first, 0)?),
            other => return Err(self.unsupported(other)),
        };

        let mut alternatives = Vec::new();
        let mut index = 1;
        while let Some(call) = calls.get(index) {
            match call.name.as_str() {
                "first" => {
                    self.call_args(call)?;
                }
                "filter" => {
                    let text = self
                        .object_str(call, 0, "hasText")?
                        .ok_or_else(|| self.unsupported("filter"))?;
                    target = match target {
                        Target::Css { selector, .. } => Target::Css {
                            selector,
                            has_text: Some(text),
                        },
                        Target::Role { role, name: None } => Target::Role {
                            role,
                            name: Some(text),
                        },
                        _ => return Err(self.unsupported("filter")),
                    };
                }
                "or" => match self.call_args(call)?.first() {
                    Some(Value::Chain(inner)) => {
                        let (targets, rest) = self.locator(inner)?;
                        if let Some(extra) = rest.first() {
                            return Err(self.unsupported(&extra.name));
                        }
                        alternatives.extend(targets);
                    }
                    _ => return Err(self.syntax("or() expects a locator")),
                },
                _ => break,
            }
            index += 1;
        }

        let mut targets = vec![target];
        targets.extend(alternatives);
        Ok((targets, &calls[index..]))
    }

    fn action(&self, targets: Vec<Target>, rest: &[Call]) -> Result<Instruction, ScriptError> {
        let call = match rest {
            [call] => call,
            [] => return Err(self.syntax("locator without an action")),
            [_, extra, ..] => return Err(self.unsupported(&extra.name)),
        };
        match call.name.as_str() {
            "click" => {
                self.call_args(call)?;
                Ok(Instruction::Click(targets))
            }
            "fill" | "type" | "pressSequentially" => {
                Ok(Instruction::Fill(targets, self.str_arg(call, 0)?))
            }
            "press" => Ok(Instruction::Press {
                targets,
                key: self.str_arg(call, 0)?,
            }),
            "waitFor" => {
                self.call_args(call)?;
                Ok(Instruction::WaitFor(targets))
            }
            "textContent" | "innerText" => {
                self.call_args(call)?;
                Ok(Instruction::Extract(targets))
            }
            other => Err(self.unsupported(other)),
        }
    }

    fn call_args<'c>(&self, call: &'c Call) -> Result<&'c [Value], ScriptError> {
        call.args
            .as_deref()
            .ok_or_else(|| self.syntax(format!("`{}` is not called", call.name)))
    }

    fn str_arg(&self, call: &Call, index: usize) -> Result<String, ScriptError> {
        match self.call_args(call)?.get(index) {
            Some(Value::Str(value)) => Ok(value.clone()),
            _ => Err(self.syntax(format!("`{}` expects a string argument", call.name))),
        }
    }

    fn opt_str_arg(&self, call: &Call, index: usize) -> Result<Option<String>, ScriptError> {
        match self.call_args(call)?.get(index) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(self.syntax(format!("`{}` expects a string argument", call.name))),
        }
    }

    fn num_arg(&self, call: &Call, index: usize) -> Result<u64, ScriptError> {
        match self.call_args(call)?.get(index) {
            Some(Value::Num(n)) if *n >= 0.0 => Ok(*n as u64),
            _ => Err(self.syntax(format!("`{}` expects a positive number", call.name))),
        }
    }

    fn object_str(
        &self,
        call: &Call,
        index: usize,
        key: &str,
    ) -> Result<Option<String>, ScriptError> {
        match self.call_args(call)?.get(index) {
            None => Ok(None),
            Some(Value::Object(fields)) => match fields.iter().find(|(k, _)| k == key) {
                None => Ok(None),
                Some((_, Value::Str(value))) => Ok(Some(value.clone())),
                Some(_) => Err(self.syntax(format!("`{key}` must be a string"))),
            },
            Some(_) => Err(self.syntax(format!("`{}` expects an options object", call.name))),
        }
    }
}
