//! Sandbox executor for dataset expressions.
//!
//! Interprets the restricted expression language emitted by the tabular
//! compiler against a single in-memory dataset. The environment contains
//! exactly that dataset; there is no host access of any kind, and every
//! method is drawn from a closed allow-list. Execution is bounded by a
//! wall-clock deadline, a result row cap, and a cell budget, and honors a
//! cooperative cancellation flag. The dataset is never mutated.
//!
//! Execution has two phases: the artifact is first parsed as a single
//! expression; when that fails (an expected condition, not an error) it is
//! executed as a short statement sequence and the result is read from the
//! output bindings `out`, `df_out`, `result`, `_`, then the dataset name,
//! in priority order.

use crate::error::{DataChatError, Result};
use crate::frame::{Frame, TabularResult};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Output-binding names probed after statement-sequence execution.
const OUTPUT_BINDINGS: &[&str] = &["out", "df_out", "result", "_"];

/// Rows between deadline/cancellation checks inside row loops.
const BUDGET_CHECK_INTERVAL: usize = 4096;

/// Hard execution bounds. The generated code is syntactically restricted
/// but can still express expensive work, so every run gets a deadline and a
/// result-size budget.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub max_rows: usize,
    pub max_cells: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            timeout: Duration::from_secs(5),
            max_rows: 10_000,
            max_cells: 2_000_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub table: TabularResult,
    /// True when the result was cut to the row cap.
    pub truncated: bool,
}

/// Restricted evaluator bound to one dataset.
pub struct Sandbox<'a> {
    frame: &'a Frame,
    limits: SandboxLimits,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Sandbox<'a> {
    pub fn new(frame: &'a Frame) -> Sandbox<'a> {
        Sandbox {
            frame,
            limits: SandboxLimits::default(),
            cancel: None,
        }
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Sandbox<'a> {
        self.limits = limits;
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Sandbox<'a> {
        self.cancel = Some(flag);
        self
    }

    /// Execute a dataset expression or statement sequence.
    pub fn execute(&self, code: &str) -> Result<SandboxOutput> {
        self.run(code).map_err(|cause| DataChatError::SandboxExecution {
            code: code.to_string(),
            cause,
        })
    }

    fn run(&self, code: &str) -> std::result::Result<SandboxOutput, String> {
        let tokens = lex(code)?;

        // Phase 1: a single expression.
        let program = match Parser::new(&tokens).parse_single_expression() {
            Ok(expr) => vec![Stmt { target: None, expr }],
            // Phase 2: a short statement sequence.
            Err(_) => Parser::new(&tokens).parse_program()?,
        };

        let eval = Evaluator {
            frame: self.frame,
            deadline: Instant::now() + self.limits.timeout,
            cancel: self.cancel.as_deref(),
            max_cells: self.limits.max_cells,
        };

        let mut env: HashMap<String, EvalResult> = HashMap::new();
        env.insert(self.frame.name.clone(), EvalResult::Table(table_of(self.frame)));

        let mut last_bare: Option<EvalResult> = None;
        for stmt in &program {
            let value = eval.eval_expr(&stmt.expr, &env)?;
            match &stmt.target {
                Some(name) => {
                    env.insert(name.clone(), value);
                    last_bare = None;
                }
                None => last_bare = Some(value),
            }
        }

        let result = match last_bare {
            Some(v) => v,
            None => {
                let mut found = None;
                for name in OUTPUT_BINDINGS.iter().copied().chain([self.frame.name.as_str()]) {
                    if let Some(v) = env.get(name) {
                        found = Some(v.clone());
                        break;
                    }
                }
                found.ok_or_else(|| "no output binding produced".to_string())?
            }
        };

        self.normalize(result)
    }

    /// Normalize any evaluation result to a table: two-dimensional results
    /// pass through, one-dimensional results become a single column, and
    /// scalars become a one-row, one-column table named `value`.
    fn normalize(&self, result: EvalResult) -> std::result::Result<SandboxOutput, String> {
        let table = match result {
            EvalResult::Table(t) => TabularResult {
                columns: t.columns,
                rows: t.rows,
            },
            EvalResult::Grouped(_) => {
                return Err("group_by must be followed by an aggregate".to_string());
            }
            EvalResult::Column(values) => TabularResult {
                columns: vec!["value".to_string()],
                rows: values.into_iter().map(|v| vec![v]).collect(),
            },
            EvalResult::Scalar(v) => TabularResult {
                columns: vec!["value".to_string()],
                rows: vec![vec![v]],
            },
        };

        if table.rows.len() > self.limits.max_rows {
            let mut cut = table;
            cut.rows.truncate(self.limits.max_rows);
            return Ok(SandboxOutput {
                table: cut,
                truncated: true,
            });
        }
        Ok(SandboxOutput {
            table,
            truncated: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    True,
    False,
    Null,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    EqEq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    AndAnd,
    Assign,
    Newline,
}

fn lex(code: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = code.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' => i += 1,
            '\n' | ';' => {
                tokens.push(Token::Newline);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err("single '&' is not a valid operator".to_string());
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    tokens.push(Token::Assign);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err("single '!' is not a valid operator".to_string());
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('"') => s.push('"'),
                                Some('\\') => s.push('\\'),
                                Some('n') => s.push('\n'),
                                Some(other) => {
                                    s.push('\\');
                                    s.push(*other);
                                }
                                None => return Err("unterminated string literal".to_string()),
                            }
                            i += 2;
                        }
                        Some(other) => {
                            s.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '-' | '0'..='9' => {
                let start = i;
                if c == '-' {
                    i += 1;
                    if !matches!(chars.get(i), Some('0'..='9')) {
                        return Err("'-' must start a number".to_string());
                    }
                }
                let mut is_float = false;
                while let Some(d) = chars.get(i) {
                    if d.is_ascii_digit() {
                        i += 1;
                    } else if *d == '.' && matches!(chars.get(i + 1), Some('0'..='9')) {
                        is_float = true;
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    let f = text
                        .parse::<f64>()
                        .map_err(|_| format!("bad number literal: {}", text))?;
                    tokens.push(Token::Float(f));
                } else {
                    let n = text
                        .parse::<i64>()
                        .map_err(|_| format!("bad number literal: {}", text))?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while let Some(d) = chars.get(i) {
                    if d.is_ascii_alphanumeric() || *d == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character: {}", other)),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Lit {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Lit>),
}

impl Lit {
    fn to_value(&self) -> Value {
        match self {
            Lit::Null => Value::Null,
            Lit::Bool(b) => Value::Bool(*b),
            Lit::Int(n) => Value::Int(*n),
            Lit::Float(f) => Value::Float(*f),
            Lit::Str(s) => Value::Text(s.clone()),
            Lit::List(_) => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone)]
enum Pred {
    And(Box<Pred>, Box<Pred>),
    Cmp {
        column: String,
        op: CmpOp,
        rhs: Lit,
    },
    /// Column-method predicate: `in`, `not_in`, `contains`, `starts_with`,
    /// `ends_with`.
    StrPred {
        column: String,
        method: String,
        arg: Lit,
    },
}

#[derive(Debug, Clone)]
enum CallArg {
    Lit(Lit),
    Pred(Pred),
}

#[derive(Debug, Clone)]
enum Expr {
    Ref(String),
    Lit(Lit),
    Call {
        recv: Box<Expr>,
        method: String,
        args: Vec<CallArg>,
    },
}

#[derive(Debug, Clone)]
struct Stmt {
    target: Option<String>,
    expr: Expr,
}

const PREDICATE_METHODS: &[&str] = &["in", "not_in", "contains", "starts_with", "ends_with"];

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Parser<'t> {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: &Token) -> std::result::Result<(), String> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(format!("expected {:?}, found {:?}", token, other)),
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek() == Some(&Token::Newline) {
            self.pos += 1;
        }
    }

    /// Parse the entire token stream as one expression; any leftover input
    /// (including an assignment) is a failure, which callers treat as "not a
    /// single expression", not as an error.
    fn parse_single_expression(&mut self) -> std::result::Result<Expr, String> {
        self.skip_newlines();
        let expr = self.parse_expr()?;
        self.skip_newlines();
        if self.pos != self.tokens.len() {
            return Err("trailing input after expression".to_string());
        }
        Ok(expr)
    }

    fn parse_program(&mut self) -> std::result::Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while self.peek().is_some() {
            stmts.push(self.parse_stmt()?);
            match self.peek() {
                None => break,
                Some(Token::Newline) => self.skip_newlines(),
                other => return Err(format!("expected end of statement, found {:?}", other)),
            }
        }
        if stmts.is_empty() {
            return Err("empty program".to_string());
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> std::result::Result<Stmt, String> {
        // Lookahead for `ident =`.
        if let (Some(Token::Ident(name)), Some(Token::Assign)) =
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            let name = name.clone();
            self.pos += 2;
            let expr = self.parse_expr()?;
            return Ok(Stmt {
                target: Some(name),
                expr,
            });
        }
        Ok(Stmt {
            target: None,
            expr: self.parse_expr()?,
        })
    }

    fn parse_expr(&mut self) -> std::result::Result<Expr, String> {
        let mut expr = match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Expr::Ref(name)
            }
            Some(Token::Str(_))
            | Some(Token::Int(_))
            | Some(Token::Float(_))
            | Some(Token::True)
            | Some(Token::False)
            | Some(Token::Null)
            | Some(Token::LBracket) => Expr::Lit(self.parse_literal()?),
            other => return Err(format!("expected expression, found {:?}", other)),
        };

        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            let method = match self.next() {
                Some(Token::Ident(m)) => m.clone(),
                other => return Err(format!("expected method name, found {:?}", other)),
            };
            self.expect(&Token::LParen)?;
            let args = if method == "filter" {
                let pred = self.parse_predicate()?;
                vec![CallArg::Pred(pred)]
            } else {
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(CallArg::Lit(self.parse_literal()?));
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                args
            };
            self.expect(&Token::RParen)?;
            expr = Expr::Call {
                recv: Box::new(expr),
                method,
                args,
            };
        }
        Ok(expr)
    }

    fn parse_literal(&mut self) -> std::result::Result<Lit, String> {
        match self.next().cloned() {
            Some(Token::Str(s)) => Ok(Lit::Str(s)),
            Some(Token::Int(n)) => Ok(Lit::Int(n)),
            Some(Token::Float(f)) => Ok(Lit::Float(f)),
            Some(Token::True) => Ok(Lit::Bool(true)),
            Some(Token::False) => Ok(Lit::Bool(false)),
            Some(Token::Null) => Ok(Lit::Null),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_literal()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Lit::List(items))
            }
            other => Err(format!("expected literal, found {:?}", other)),
        }
    }

    fn parse_predicate(&mut self) -> std::result::Result<Pred, String> {
        let mut left = self.parse_predicate_unit()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let right = self.parse_predicate_unit()?;
            left = Pred::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_predicate_unit(&mut self) -> std::result::Result<Pred, String> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_predicate()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }

        let column = match self.next() {
            Some(Token::Ident(c)) => c.clone(),
            other => return Err(format!("expected column name, found {:?}", other)),
        };

        match self.next().cloned() {
            Some(Token::EqEq) => Ok(Pred::Cmp {
                column,
                op: CmpOp::Eq,
                rhs: self.parse_literal()?,
            }),
            Some(Token::Ne) => Ok(Pred::Cmp {
                column,
                op: CmpOp::Ne,
                rhs: self.parse_literal()?,
            }),
            Some(Token::Gt) => Ok(Pred::Cmp {
                column,
                op: CmpOp::Gt,
                rhs: self.parse_literal()?,
            }),
            Some(Token::Ge) => Ok(Pred::Cmp {
                column,
                op: CmpOp::Ge,
                rhs: self.parse_literal()?,
            }),
            Some(Token::Lt) => Ok(Pred::Cmp {
                column,
                op: CmpOp::Lt,
                rhs: self.parse_literal()?,
            }),
            Some(Token::Le) => Ok(Pred::Cmp {
                column,
                op: CmpOp::Le,
                rhs: self.parse_literal()?,
            }),
            Some(Token::Dot) => {
                let method = match self.next() {
                    Some(Token::Ident(m)) => m.clone(),
                    other => return Err(format!("expected predicate method, found {:?}", other)),
                };
                if !PREDICATE_METHODS.contains(&method.as_str()) {
                    return Err(format!("unknown predicate method: {}", method));
                }
                self.expect(&Token::LParen)?;
                let arg = self.parse_literal()?;
                self.expect(&Token::RParen)?;
                Ok(Pred::StrPred {
                    column,
                    method,
                    arg,
                })
            }
            other => Err(format!("expected comparison operator, found {:?}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TableData {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone)]
struct GroupedData {
    keys: Vec<String>,
    table: TableData,
}

#[derive(Debug, Clone)]
enum EvalResult {
    Table(TableData),
    Grouped(GroupedData),
    Column(Vec<Value>),
    Scalar(Value),
}

fn table_of(frame: &Frame) -> TableData {
    TableData {
        columns: frame.columns.clone(),
        rows: frame.rows.clone(),
    }
}

struct Evaluator<'a> {
    frame: &'a Frame,
    deadline: Instant,
    cancel: Option<&'a AtomicBool>,
    max_cells: usize,
}

impl<'a> Evaluator<'a> {
    fn check_budget(&self) -> std::result::Result<(), String> {
        if Instant::now() >= self.deadline {
            return Err("evaluation timed out".to_string());
        }
        if let Some(flag) = self.cancel {
            if flag.load(AtomicOrdering::Relaxed) {
                return Err("evaluation cancelled".to_string());
            }
        }
        Ok(())
    }

    fn check_row_budget(&self, processed: usize) -> std::result::Result<(), String> {
        if processed % BUDGET_CHECK_INTERVAL == 0 {
            self.check_budget()?;
        }
        Ok(())
    }

    fn guard_size(&self, table: &TableData) -> std::result::Result<(), String> {
        let cells = table.rows.len().saturating_mul(table.columns.len().max(1));
        if cells > self.max_cells {
            return Err(format!(
                "result exceeds the cell budget ({} cells)",
                self.max_cells
            ));
        }
        Ok(())
    }

    fn eval_expr(
        &self,
        expr: &Expr,
        env: &HashMap<String, EvalResult>,
    ) -> std::result::Result<EvalResult, String> {
        self.check_budget()?;
        match expr {
            Expr::Ref(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| format!("unknown name: {} (only '{}' is available)", name, self.frame.name)),
            Expr::Lit(Lit::List(items)) => {
                Ok(EvalResult::Column(items.iter().map(|l| l.to_value()).collect()))
            }
            Expr::Lit(lit) => Ok(EvalResult::Scalar(lit.to_value())),
            Expr::Call { recv, method, args } => {
                let receiver = self.eval_expr(recv, env)?;
                self.call(receiver, method, args)
            }
        }
    }

    fn call(
        &self,
        receiver: EvalResult,
        method: &str,
        args: &[CallArg],
    ) -> std::result::Result<EvalResult, String> {
        match receiver {
            EvalResult::Table(table) => self.call_table(table, method, args),
            EvalResult::Grouped(grouped) => self.call_grouped(grouped, method, args),
            EvalResult::Column(_) | EvalResult::Scalar(_) => {
                Err(format!("cannot call {}() on a scalar value", method))
            }
        }
    }

    fn call_table(
        &self,
        table: TableData,
        method: &str,
        args: &[CallArg],
    ) -> std::result::Result<EvalResult, String> {
        match method {
            "filter" => {
                let pred = match args {
                    [CallArg::Pred(p)] => p,
                    _ => return Err("filter() expects a predicate".to_string()),
                };
                let mut rows = Vec::new();
                for (i, row) in table.rows.iter().enumerate() {
                    self.check_row_budget(i + 1)?;
                    if self.eval_pred(pred, &table, row)? {
                        rows.push(row.clone());
                    }
                }
                let out = TableData {
                    columns: table.columns.clone(),
                    rows,
                };
                self.guard_size(&out)?;
                Ok(EvalResult::Table(out))
            }
            "select" => {
                let names = lit_strings(args, "select")?;
                if names.is_empty() {
                    return Err("select() expects at least one column".to_string());
                }
                let idx = column_indexes(&table, &names)?;
                let rows = table
                    .rows
                    .iter()
                    .map(|row| idx.iter().map(|&i| row[i].clone()).collect())
                    .collect();
                Ok(EvalResult::Table(TableData {
                    columns: names,
                    rows,
                }))
            }
            "distinct" => {
                let names = lit_strings(args, "distinct")?;
                let (columns, idx) = if names.is_empty() {
                    (
                        table.columns.clone(),
                        (0..table.columns.len()).collect::<Vec<_>>(),
                    )
                } else {
                    let idx = column_indexes(&table, &names)?;
                    (names, idx)
                };
                let mut seen = std::collections::HashSet::new();
                let mut rows = Vec::new();
                for (i, row) in table.rows.iter().enumerate() {
                    self.check_row_budget(i + 1)?;
                    let projected: Vec<Value> = idx.iter().map(|&i| row[i].clone()).collect();
                    let key = row_key(&projected);
                    if seen.insert(key) {
                        rows.push(projected);
                    }
                }
                let out = TableData { columns, rows };
                self.guard_size(&out)?;
                Ok(EvalResult::Table(out))
            }
            "group_by" => {
                let keys = lit_strings(args, "group_by")?;
                if keys.is_empty() {
                    return Err("group_by() expects at least one column".to_string());
                }
                column_indexes(&table, &keys)?;
                Ok(EvalResult::Grouped(GroupedData { keys, table }))
            }
            "sort_by" => {
                let (column, descending) = sort_args(args)?;
                let idx = column_index(&table, &column)?;
                let mut rows = table.rows.clone();
                rows.sort_by(|a, b| {
                    let ord = compare_cells(&a[idx], &b[idx]);
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
                Ok(EvalResult::Table(TableData {
                    columns: table.columns.clone(),
                    rows,
                }))
            }
            "limit" => {
                let n = match args {
                    [CallArg::Lit(Lit::Int(n))] if *n >= 0 => *n as usize,
                    _ => return Err("limit() expects a non-negative integer".to_string()),
                };
                let mut rows = table.rows.clone();
                rows.truncate(n);
                Ok(EvalResult::Table(TableData {
                    columns: table.columns.clone(),
                    rows,
                }))
            }
            "count" => Ok(EvalResult::Table(TableData {
                columns: vec!["count".to_string()],
                rows: vec![vec![Value::Int(table.rows.len() as i64)]],
            })),
            "sum" | "mean" | "median" | "min" | "max" => {
                let column = single_column_arg(args, method)?;
                let idx = column_index(&table, &column)?;
                let value = aggregate(method, table.rows.iter().map(|r| &r[idx]))?;
                Ok(EvalResult::Table(TableData {
                    columns: vec![format!("{}_{}", method, column)],
                    rows: vec![vec![value]],
                }))
            }
            other => Err(format!("unknown method: {}", other)),
        }
    }

    fn call_grouped(
        &self,
        grouped: GroupedData,
        method: &str,
        args: &[CallArg],
    ) -> std::result::Result<EvalResult, String> {
        let key_idx = column_indexes(&grouped.table, &grouped.keys)?;

        // Group rows by key, preserving first-occurrence order.
        let mut order: Vec<String> = Vec::new();
        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in grouped.table.rows.iter().enumerate() {
            self.check_row_budget(i + 1)?;
            let key_cells: Vec<Value> = key_idx.iter().map(|&k| row[k].clone()).collect();
            let key = row_key(&key_cells);
            if !buckets.contains_key(&key) {
                order.push(key.clone());
            }
            buckets.entry(key).or_default().push(i);
        }

        let (agg_column, value_idx) = match method {
            "count" => {
                if !args.is_empty() {
                    return Err("count() takes no arguments".to_string());
                }
                ("count".to_string(), None)
            }
            "sum" | "mean" | "median" | "min" | "max" => {
                let column = single_column_arg(args, method)?;
                let idx = column_index(&grouped.table, &column)?;
                (format!("{}_{}", method, column), Some(idx))
            }
            other => {
                return Err(format!(
                    "unknown aggregate after group_by: {}",
                    other
                ))
            }
        };

        let mut columns = grouped.keys.clone();
        columns.push(agg_column);

        let mut rows = Vec::with_capacity(order.len());
        for key in order {
            let indexes = &buckets[&key];
            let first = indexes[0];
            let mut row: Vec<Value> = key_idx
                .iter()
                .map(|&k| grouped.table.rows[first][k].clone())
                .collect();
            let value = match value_idx {
                None => Value::Int(indexes.len() as i64),
                Some(idx) => aggregate(
                    method,
                    indexes.iter().map(|&i| &grouped.table.rows[i][idx]),
                )?,
            };
            row.push(value);
            rows.push(row);
        }

        let out = TableData { columns, rows };
        self.guard_size(&out)?;
        Ok(EvalResult::Table(out))
    }

    fn eval_pred(
        &self,
        pred: &Pred,
        table: &TableData,
        row: &[Value],
    ) -> std::result::Result<bool, String> {
        match pred {
            Pred::And(a, b) => {
                Ok(self.eval_pred(a, table, row)? && self.eval_pred(b, table, row)?)
            }
            Pred::Cmp { column, op, rhs } => {
                let idx = column_index(table, column)?;
                compare_pred(&row[idx], *op, rhs)
            }
            Pred::StrPred {
                column,
                method,
                arg,
            } => {
                let idx = column_index(table, column)?;
                let cell = &row[idx];
                match method.as_str() {
                    "in" | "not_in" => {
                        let items = match arg {
                            Lit::List(items) => items,
                            _ => return Err(format!("{}() expects a list", method)),
                        };
                        if cell.is_null() {
                            return Ok(false);
                        }
                        let found = items.iter().any(|l| cell.loose_eq(&l.to_value()));
                        Ok(if method == "in" { found } else { !found })
                    }
                    // Case-insensitive, null-safe string predicates.
                    _ => {
                        if cell.is_null() {
                            return Ok(false);
                        }
                        let haystack = cell.to_string().to_lowercase();
                        let needle = match arg {
                            Lit::Str(s) => s.to_lowercase(),
                            other => other.to_value().to_string().to_lowercase(),
                        };
                        Ok(match method.as_str() {
                            "contains" => haystack.contains(&needle),
                            "starts_with" => haystack.starts_with(&needle),
                            "ends_with" => haystack.ends_with(&needle),
                            _ => unreachable!("parser allow-lists predicate methods"),
                        })
                    }
                }
            }
        }
    }
}

fn lit_strings(args: &[CallArg], method: &str) -> std::result::Result<Vec<String>, String> {
    args.iter()
        .map(|a| match a {
            CallArg::Lit(Lit::Str(s)) => Ok(s.clone()),
            _ => Err(format!("{}() expects column-name strings", method)),
        })
        .collect()
}

fn single_column_arg(args: &[CallArg], method: &str) -> std::result::Result<String, String> {
    match args {
        [CallArg::Lit(Lit::Str(s))] => Ok(s.clone()),
        _ => Err(format!("{}() expects exactly one column name", method)),
    }
}

fn sort_args(args: &[CallArg]) -> std::result::Result<(String, bool), String> {
    match args {
        [CallArg::Lit(Lit::Str(s))] => Ok((s.clone(), false)),
        [CallArg::Lit(Lit::Str(s)), CallArg::Lit(Lit::Bool(desc))] => Ok((s.clone(), *desc)),
        _ => Err("sort_by() expects a column name and an optional descending flag".to_string()),
    }
}

fn column_index(table: &TableData, name: &str) -> std::result::Result<usize, String> {
    table
        .columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| format!("unknown column: {}", name))
}

fn column_indexes(table: &TableData, names: &[String]) -> std::result::Result<Vec<usize>, String> {
    names.iter().map(|n| column_index(table, n)).collect()
}

/// Stable textual key for grouping and distinct.
fn row_key(cells: &[Value]) -> String {
    cells
        .iter()
        .map(|v| match v {
            Value::Null => "\u{0}null".to_string(),
            Value::Bool(b) => format!("b:{}", b),
            Value::Int(n) => format!("n:{}", *n as f64),
            Value::Float(f) => format!("n:{}", f),
            Value::Text(s) => format!("t:{}", s),
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Total ordering for sorting: nulls last, numbers before text, numeric and
/// lexical comparison within a kind.
fn compare_cells(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.to_string().cmp(&b.to_string()),
        },
    }
}

/// Null-safe comparison: any comparison against a null cell is false.
/// Ordering across incompatible kinds is a type error; equality across
/// incompatible kinds is simply false.
fn compare_pred(cell: &Value, op: CmpOp, rhs: &Lit) -> std::result::Result<bool, String> {
    let rhs = rhs.to_value();
    if cell.is_null() || rhs.is_null() {
        return Ok(false);
    }
    match op {
        CmpOp::Eq => Ok(cell.loose_eq(&rhs)),
        CmpOp::Ne => Ok(!cell.loose_eq(&rhs)),
        _ => {
            let ord = match (cell.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                (None, None) => match (cell, &rhs) {
                    (Value::Text(a), Value::Text(b)) => Some(a.as_str().cmp(b.as_str())),
                    _ => None,
                },
                _ => None,
            };
            let ord = ord.ok_or_else(|| {
                format!(
                    "type mismatch: cannot order {} against {}",
                    cell.type_name(),
                    rhs.type_name()
                )
            })?;
            Ok(match op {
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Ge => ord.is_ge(),
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Eq | CmpOp::Ne => unreachable!(),
            })
        }
    }
}

/// Aggregate non-null values of a column. Non-numeric values under a
/// numeric aggregate are a type error.
fn aggregate<'v, I>(method: &str, cells: I) -> std::result::Result<Value, String>
where
    I: Iterator<Item = &'v Value>,
{
    let mut values: Vec<f64> = Vec::new();
    let mut all_int = true;
    for cell in cells {
        match cell {
            Value::Null => continue,
            Value::Int(n) => values.push(*n as f64),
            Value::Float(f) => {
                all_int = false;
                values.push(*f);
            }
            other => {
                return Err(format!(
                    "type mismatch: {}() over non-numeric value of type {}",
                    method,
                    other.type_name()
                ))
            }
        }
    }

    if values.is_empty() {
        return Ok(match method {
            "sum" => Value::Int(0),
            _ => Value::Null,
        });
    }

    Ok(match method {
        "sum" => {
            let total: f64 = values.iter().sum();
            if all_int {
                Value::Int(total as i64)
            } else {
                Value::Float(total)
            }
        }
        "mean" => Value::Float(values.iter().sum::<f64>() / values.len() as f64),
        "median" => {
            let mut sorted = values.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 1 {
                Value::Float(sorted[mid])
            } else {
                Value::Float((sorted[mid - 1] + sorted[mid]) / 2.0)
            }
        }
        "min" => {
            let m = values.iter().cloned().fold(f64::INFINITY, f64::min);
            if all_int {
                Value::Int(m as i64)
            } else {
                Value::Float(m)
            }
        }
        "max" => {
            let m = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if all_int {
                Value::Int(m as i64)
            } else {
                Value::Float(m)
            }
        }
        other => return Err(format!("unknown aggregate: {}", other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    const CSV: &str = "\
genero,salario,departamento,edad
M,50000,IT,34
F,52000,IT,29
M,41000,Ventas,45
F,47500,Ventas,38
M,39000,IT,23
";

    fn frame() -> Frame {
        Frame::from_csv_text("df".into(), CSV).unwrap()
    }

    fn run(code: &str) -> TabularResult {
        let frame = frame();
        Sandbox::new(&frame).execute(code).unwrap().table
    }

    #[test]
    fn test_count_expression() {
        let out = run("df.count()");
        assert_eq!(out.columns, vec!["count"]);
        assert_eq!(out.rows, vec![vec![Value::Int(5)]]);
    }

    #[test]
    fn test_statement_with_out_binding() {
        let out = run("out = df.count()");
        assert_eq!(out.rows[0][0], Value::Int(5));
    }

    #[test]
    fn test_filter_and_mean() {
        let out = run("out = df.filter(departamento == \"IT\").mean(\"salario\")");
        assert_eq!(out.columns, vec!["mean_salario"]);
        assert_eq!(out.rows[0][0], Value::Float(47000.0));
    }

    #[test]
    fn test_grouped_mean_preserves_first_occurrence_order() {
        let out = run("out = df.group_by(\"genero\").mean(\"salario\")");
        assert_eq!(out.columns, vec!["genero", "mean_salario"]);
        assert_eq!(out.rows.len(), 2);
        // M appears first in the data.
        assert_eq!(out.rows[0][0], Value::Text("M".into()));
    }

    #[test]
    fn test_grouped_count() {
        let out = run("out = df.group_by(\"departamento\").count()");
        assert_eq!(out.columns, vec!["departamento", "count"]);
        let it = out
            .rows
            .iter()
            .find(|r| r[0] == Value::Text("IT".into()))
            .unwrap();
        assert_eq!(it[1], Value::Int(3));
    }

    #[test]
    fn test_compound_filter() {
        let out = run(
            "out = df.filter(departamento == \"IT\" && salario >= 40000).count()",
        );
        assert_eq!(out.rows[0][0], Value::Int(2));
    }

    #[test]
    fn test_string_predicates() {
        let out = run("out = df.filter(departamento.contains(\"ven\")).count()");
        assert_eq!(out.rows[0][0], Value::Int(2));
        let out = run("out = df.filter(departamento.starts_with(\"it\")).count()");
        assert_eq!(out.rows[0][0], Value::Int(3));
    }

    #[test]
    fn test_in_predicate() {
        let out = run("out = df.filter(genero.in([\"F\"])).count()");
        assert_eq!(out.rows[0][0], Value::Int(2));
        let out = run("out = df.filter(genero.not_in([\"F\"])).count()");
        assert_eq!(out.rows[0][0], Value::Int(3));
    }

    #[test]
    fn test_distinct_select_sort_limit() {
        let out = run("out = df.distinct(\"departamento\")");
        assert_eq!(out.rows.len(), 2);

        let out = run("out = df.select(\"genero\", \"salario\").sort_by(\"salario\", true).limit(2)");
        assert_eq!(out.columns, vec!["genero", "salario"]);
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0][1], Value::Int(52000));
    }

    #[test]
    fn test_median() {
        let out = run("out = df.median(\"salario\")");
        assert_eq!(out.rows[0][0], Value::Float(47500.0));
    }

    #[test]
    fn test_scalar_normalized_to_value_table() {
        let out = run("out = 42");
        assert_eq!(out.columns, vec!["value"]);
        assert_eq!(out.rows, vec![vec![Value::Int(42)]]);
    }

    #[test]
    fn test_list_normalized_to_single_column() {
        let out = run("out = [1, 2, 3]");
        assert_eq!(out.columns, vec!["value"]);
        assert_eq!(out.rows.len(), 3);
    }

    #[test]
    fn test_unknown_name_fails() {
        let frame = frame();
        let err = Sandbox::new(&frame).execute("evil_table.count()").unwrap_err();
        match err {
            DataChatError::SandboxExecution { cause, .. } => {
                assert!(cause.contains("unknown name"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unknown_column_fails_with_code_attached() {
        let frame = frame();
        let err = Sandbox::new(&frame)
            .execute("out = df.mean(\"sueldo\")")
            .unwrap_err();
        match err {
            DataChatError::SandboxExecution { code, cause } => {
                assert!(cause.contains("unknown column"));
                assert!(code.contains("sueldo"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unknown_method_fails() {
        let frame = frame();
        let err = Sandbox::new(&frame).execute("df.explode()").unwrap_err();
        match err {
            DataChatError::SandboxExecution { cause, .. } => {
                assert!(cause.contains("unknown method"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_type_mismatch_on_text_aggregate() {
        let frame = frame();
        let err = Sandbox::new(&frame)
            .execute("out = df.mean(\"genero\")")
            .unwrap_err();
        match err {
            DataChatError::SandboxExecution { cause, .. } => {
                assert!(cause.contains("type mismatch"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_bare_group_by_is_an_error() {
        let frame = frame();
        let err = Sandbox::new(&frame)
            .execute("out = df.group_by(\"genero\")")
            .unwrap_err();
        match err {
            DataChatError::SandboxExecution { cause, .. } => {
                assert!(cause.contains("aggregate"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_timeout_enforced() {
        let frame = frame();
        let limits = SandboxLimits {
            timeout: Duration::from_secs(0),
            ..SandboxLimits::default()
        };
        let err = Sandbox::new(&frame)
            .with_limits(limits)
            .execute("df.count()")
            .unwrap_err();
        match err {
            DataChatError::SandboxExecution { cause, .. } => {
                assert!(cause.contains("timed out"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_cancellation() {
        let frame = frame();
        let flag = Arc::new(AtomicBool::new(true));
        let err = Sandbox::new(&frame)
            .with_cancel(flag)
            .execute("df.count()")
            .unwrap_err();
        match err {
            DataChatError::SandboxExecution { cause, .. } => {
                assert!(cause.contains("cancelled"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_row_cap_truncates() {
        let frame = frame();
        let limits = SandboxLimits {
            max_rows: 2,
            ..SandboxLimits::default()
        };
        let out = Sandbox::new(&frame)
            .with_limits(limits)
            .execute("df")
            .unwrap();
        assert!(out.truncated);
        assert_eq!(out.table.rows.len(), 2);
    }

    #[test]
    fn test_output_binding_priority() {
        let out = run("ignored = df.count()\nout = df.filter(genero == \"F\")");
        assert_eq!(out.rows.len(), 2);
    }

    #[test]
    fn test_dataset_fallback_binding() {
        // A statement sequence that binds none of the output names yields
        // the dataset itself as the last-resort binding.
        let out = run("ignored = df.count()");
        assert_eq!(out.rows.len(), 5);
    }

    #[test]
    fn test_null_safe_comparisons() {
        let frame = Frame::from_csv_text("df".into(), "a,b\n1,x\n,y\n3,\n").unwrap();
        let out = Sandbox::new(&frame)
            .execute("out = df.filter(a > 0).count()")
            .unwrap();
        assert_eq!(out.table.rows[0][0], Value::Int(2));
    }

    #[test]
    fn test_dataset_is_not_mutated() {
        let frame = frame();
        let before = frame.rows.clone();
        let _ = Sandbox::new(&frame)
            .execute("out = df.filter(genero == \"F\").mean(\"salario\")")
            .unwrap();
        assert_eq!(frame.rows, before);
    }
}
