//! RPN 평가기 — 함수 단계에서 쓰이는 후위 표기 스택 언어
//!
//! 프로그램 텍스트는 한 번 토크나이즈/컴파일되어 [`RpnProgram`]이 되고,
//! 행마다 실행됩니다. 알 수 없는 토큰은 컴파일 시점에 프로그램당 한 번만
//! 경고하고 무시합니다.
//!
//! 스택의 초기 상태는 현재 값 하나이며, 프로그램 소비 후 스택 최상단이
//! 새 값이 됩니다. undefined는 연산별 규칙에 따라 전파됩니다.

use std::collections::HashSet;

use regex::Regex;
use tracing::warn;

use metricast_core::value::Value;

use crate::function::FnCtx;

/// 컴파일된 RPN 프로그램
#[derive(Debug, Clone)]
pub struct RpnProgram {
    instrs: Vec<Instr>,
}

/// 실행 명령 하나
#[derive(Debug, Clone)]
enum Instr {
    /// 리터럴 푸시 (문자열/숫자)
    Push(Value),
    /// `$name` — 현재 행의 필드 푸시
    RowField(String),
    /// `#name` — 호스트 변수 푸시
    HostVar(String),
    /// `@` — 호스트 이름 푸시
    HostName,
    /// 연산자
    Op(Op),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Ln,
    Log10,
    Exp,
    Pow,
    PushUndef,
    Defined,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    IfElse,
    Match,
    Replace,
    Concat,
    Pop,
    Exch,
    Dup,
    Index,
}

impl RpnProgram {
    /// 프로그램 텍스트를 컴파일합니다.
    pub fn compile(program: &str) -> Self {
        let mut instrs = Vec::new();
        let mut warned: HashSet<String> = HashSet::new();

        for token in tokenize(program) {
            match token {
                RawToken::Quoted(body) => instrs.push(Instr::Push(Value::Str(body))),
                RawToken::Bare(word) => {
                    if is_number(&word) {
                        if let Ok(n) = word.parse::<f64>() {
                            instrs.push(Instr::Push(Value::num(n)));
                        }
                    } else if let Some(name) = word.strip_prefix('$') {
                        instrs.push(Instr::RowField(name.to_owned()));
                    } else if let Some(name) = word.strip_prefix('#') {
                        instrs.push(Instr::HostVar(name.to_owned()));
                    } else if word == "@" {
                        instrs.push(Instr::HostName);
                    } else if let Some(op) = lookup_op(&word) {
                        instrs.push(Instr::Op(op));
                    } else if warned.insert(word.clone()) {
                        warn!(token = %word, "unknown rpn token ignored");
                    }
                }
            }
        }

        Self { instrs }
    }

    /// 현재 값을 스택 초기 상태로 프로그램을 실행합니다.
    pub fn run(&self, initial: Value, ctx: &FnCtx<'_>) -> Value {
        let mut stack: Vec<Value> = vec![initial];

        for instr in &self.instrs {
            match instr {
                Instr::Push(v) => stack.push(v.clone()),
                Instr::RowField(name) => {
                    stack.push(ctx.row.get(name).cloned().unwrap_or(Value::Undefined));
                }
                Instr::HostVar(name) => {
                    stack.push(ctx.hostvars.get(name).cloned().unwrap_or(Value::Undefined));
                }
                Instr::HostName => stack.push(Value::str(ctx.host)),
                Instr::Op(op) => exec_op(*op, &mut stack),
            }
        }

        stack.last().cloned().unwrap_or(Value::Undefined)
    }
}

fn exec_op(op: Op, stack: &mut Vec<Value>) {
    match op {
        Op::Add => num_binop(stack, |a, b| Some(a + b)),
        Op::Sub => num_binop(stack, |a, b| Some(a - b)),
        Op::Mul => num_binop(stack, |a, b| Some(a * b)),
        Op::Div => num_binop(stack, |a, b| if b == 0.0 { None } else { Some(a / b) }),
        Op::Mod => num_binop(stack, |a, b| if b == 0.0 { None } else { Some(a % b) }),
        Op::Pow => num_binop(stack, |a, b| Some(a.powf(b))),
        Op::Ln => num_unop(stack, |a| if a > 0.0 { Some(a.ln()) } else { None }),
        Op::Log10 => num_unop(stack, |a| if a > 0.0 { Some(a.log10()) } else { None }),
        Op::Exp => num_unop(stack, |a| Some(a.exp())),
        Op::PushUndef => stack.push(Value::Undefined),
        Op::Defined => {
            let a = pop(stack);
            stack.push(bool_value(a.is_defined()));
        }
        Op::Eq | Op::Ne => {
            let b = pop(stack);
            let a = pop(stack);
            let equal = values_equal(&a, &b);
            let result = if op == Op::Eq { equal } else { !equal };
            stack.push(bool_value(result));
        }
        Op::Lt => ord_binop(stack, |a, b| a < b),
        Op::Le => ord_binop(stack, |a, b| a <= b),
        Op::Gt => ord_binop(stack, |a, b| a > b),
        Op::Ge => ord_binop(stack, |a, b| a >= b),
        Op::And => {
            let b = pop(stack);
            let a = pop(stack);
            stack.push(bool_value(a.truthy() && b.truthy()));
        }
        Op::Or => {
            let b = pop(stack);
            let a = pop(stack);
            stack.push(bool_value(a.truthy() || b.truthy()));
        }
        Op::Not => {
            let a = pop(stack);
            stack.push(bool_value(!a.truthy()));
        }
        Op::IfElse => {
            let b = pop(stack);
            let a = pop(stack);
            let pred = pop(stack);
            stack.push(if pred.truthy() { a } else { b });
        }
        Op::Match => {
            let pattern = pop(stack);
            let subject = pop(stack);
            stack.push(rpn_match(&subject, &pattern));
        }
        Op::Replace => {
            let replacement = pop(stack);
            let pattern = pop(stack);
            let subject = pop(stack);
            stack.push(rpn_replace(&subject, &pattern, &replacement));
        }
        Op::Concat => {
            let b = pop(stack);
            let a = pop(stack);
            let mut s = a.as_text().unwrap_or_default();
            s.push_str(&b.as_text().unwrap_or_default());
            stack.push(Value::Str(s));
        }
        // 스택 조작은 언더플로에서 no-op입니다.
        Op::Pop => {
            stack.pop();
        }
        Op::Exch => {
            let len = stack.len();
            if len >= 2 {
                stack.swap(len - 1, len - 2);
            }
        }
        Op::Dup => {
            if let Some(top) = stack.last().cloned() {
                stack.push(top);
            }
        }
        Op::Index => {
            let n = pop(stack);
            let picked = match n.as_num() {
                Some(n) if n >= 1.0 => {
                    let n = n as usize;
                    stack
                        .len()
                        .checked_sub(n)
                        .and_then(|i| stack.get(i).cloned())
                }
                _ => None,
            };
            stack.push(picked.unwrap_or(Value::Undefined));
        }
    }
}

/// 값 소비 연산의 pop: 빈 스택은 undefined로 읽힙니다.
fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().unwrap_or(Value::Undefined)
}

fn bool_value(b: bool) -> Value {
    Value::Num(if b { 1.0 } else { 0.0 })
}

fn num_binop(stack: &mut Vec<Value>, f: impl Fn(f64, f64) -> Option<f64>) {
    let b = pop(stack);
    let a = pop(stack);
    let result = match (a.as_num(), b.as_num()) {
        (Some(a), Some(b)) => f(a, b).map(Value::num).unwrap_or(Value::Undefined),
        _ => Value::Undefined,
    };
    stack.push(result);
}

fn num_unop(stack: &mut Vec<Value>, f: impl Fn(f64) -> Option<f64>) {
    let a = pop(stack);
    let result = match a.as_num() {
        Some(a) => f(a).map(Value::num).unwrap_or(Value::Undefined),
        None => Value::Undefined,
    };
    stack.push(result);
}

/// 비교 연산: undefined(숫자로 읽을 수 없는 값 포함)가 하나라도 있으면 0.
fn ord_binop(stack: &mut Vec<Value>, f: impl Fn(f64, f64) -> bool) {
    let b = pop(stack);
    let a = pop(stack);
    let result = match (a.as_num(), b.as_num()) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    };
    stack.push(bool_value(result));
}

/// `==`/`!=`의 동등성: 둘 다 undefined면 같음, 하나만 undefined면 다름,
/// 둘 다 숫자로 읽히면 숫자 비교, 아니면 문자열 비교.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.is_defined(), b.is_defined()) {
        (false, false) => true,
        (true, false) | (false, true) => false,
        (true, true) => match (a.as_num(), b.as_num()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_text() == b.as_text(),
        },
    }
}

fn rpn_match(subject: &Value, pattern: &Value) -> Value {
    let (Some(subject), Some(pattern)) = (subject.as_text(), pattern.as_text()) else {
        return Value::Undefined;
    };
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "invalid rpn match pattern");
            return Value::Undefined;
        }
    };
    re.captures(&subject)
        .and_then(|caps| caps.get(1).map(|m| Value::str(m.as_str())))
        .unwrap_or(Value::Undefined)
}

fn rpn_replace(subject: &Value, pattern: &Value, replacement: &Value) -> Value {
    let (Some(subject), Some(pattern), Some(replacement)) =
        (subject.as_text(), pattern.as_text(), replacement.as_text())
    else {
        return Value::Undefined;
    };
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "invalid rpn replace pattern");
            return Value::Undefined;
        }
    };
    Value::Str(re.replace(&subject, replacement.as_str()).into_owned())
}

/// 원시 토큰
enum RawToken {
    /// 따옴표 문자열 (이스케이프 해제된 본문)
    Quoted(String),
    /// 그 밖의 비공백 연속
    Bare(String),
}

/// 왼쪽에서 오른쪽으로 스캔합니다.
///
/// 따옴표 문자열 안의 `\x`는 x 자체로 해제됩니다. 닫히지 않은 따옴표는
/// 남은 텍스트 전체를 본문으로 받아들이고, 끝에 걸린 백슬래시는
/// 버립니다.
fn tokenize(program: &str) -> Vec<RawToken> {
    let mut tokens = Vec::new();
    let mut chars = program.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            chars.next();
            let mut body = String::new();
            loop {
                match chars.next() {
                    None => break,
                    Some('\\') => {
                        if let Some(escaped) = chars.next() {
                            body.push(escaped);
                        }
                    }
                    Some(ch) if ch == quote => break,
                    Some(ch) => body.push(ch),
                }
            }
            tokens.push(RawToken::Quoted(body));
        } else {
            let mut word = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                word.push(ch);
                chars.next();
            }
            tokens.push(RawToken::Bare(word));
        }
    }

    tokens
}

/// 십진수 문법 `^[+-]?([0-9]+\.?|[0-9]*\.[0-9]+)$`
fn is_number(tok: &str) -> bool {
    let s = tok.strip_prefix(['+', '-']).unwrap_or(tok);
    if s.is_empty() {
        return false;
    }
    match s.split_once('.') {
        None => s.bytes().all(|b| b.is_ascii_digit()),
        Some((int_part, "")) => {
            !int_part.is_empty() && int_part.bytes().all(|b| b.is_ascii_digit())
        }
        Some((int_part, frac)) => {
            int_part.bytes().all(|b| b.is_ascii_digit())
                && frac.bytes().all(|b| b.is_ascii_digit())
        }
    }
}

fn lookup_op(word: &str) -> Option<Op> {
    Some(match word {
        "+" => Op::Add,
        "-" => Op::Sub,
        "*" => Op::Mul,
        "/" => Op::Div,
        "%" => Op::Mod,
        "ln" => Op::Ln,
        "log10" => Op::Log10,
        "exp" => Op::Exp,
        "pow" => Op::Pow,
        "_" => Op::PushUndef,
        "defined?" => Op::Defined,
        "==" => Op::Eq,
        "!=" => Op::Ne,
        "<" => Op::Lt,
        "<=" => Op::Le,
        ">" => Op::Gt,
        ">=" => Op::Ge,
        "and" => Op::And,
        "or" => Op::Or,
        "not" => Op::Not,
        "ifelse" => Op::IfElse,
        "match" => Op::Match,
        "replace" => Op::Replace,
        "concat" => Op::Concat,
        "pop" => Op::Pop,
        "exch" => Op::Exch,
        "dup" => Op::Dup,
        "index" => Op::Index,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    fn ctx_data() -> (BTreeMap<String, Value>, HashMap<String, Value>) {
        let mut row = BTreeMap::new();
        row.insert("speed".to_owned(), Value::Num(1000.0));
        row.insert("name".to_owned(), Value::str("eth0"));
        let mut hostvars = HashMap::new();
        hostvars.insert("site".to_owned(), Value::str("seoul"));
        (row, hostvars)
    }

    fn eval(program: &str, initial: Value) -> Value {
        let (row, hostvars) = ctx_data();
        let ctx = FnCtx {
            row: &row,
            hostvars: &hostvars,
            host: "h1",
        };
        RpnProgram::compile(program).run(initial, &ctx)
    }

    #[test]
    fn rate_conversion_chain() {
        // 125000 → *8 → /1e9 → *100 = 0.1
        let result = eval("8 * 1000000000 / 100 *", Value::Num(125000.0));
        let n = result.as_num().expect("defined number");
        assert!((n - 0.1).abs() < 1e-12);
    }

    #[test]
    fn divide_by_zero_is_undefined() {
        assert_eq!(eval("0 /", Value::Num(5.0)), Value::Undefined);
        assert_eq!(eval("1 0 /", Value::Num(9.0)), Value::Undefined);
        assert_eq!(eval("0 / defined?", Value::Num(5.0)), Value::Num(0.0));
    }

    #[test]
    fn modulus_by_zero_is_undefined() {
        assert_eq!(eval("0 %", Value::Num(5.0)), Value::Undefined);
    }

    #[test]
    fn log_of_zero_is_undefined() {
        assert_eq!(eval("ln", Value::Num(0.0)), Value::Undefined);
        assert_eq!(eval("log10", Value::Num(0.0)), Value::Undefined);
        assert_eq!(eval("ln", Value::Num(-2.0)), Value::Undefined);
        assert_eq!(eval("log10", Value::Num(100.0)), Value::Num(2.0));
    }

    #[test]
    fn undefined_literal_and_defined_check() {
        assert_eq!(eval("_ defined?", Value::Num(1.0)), Value::Num(0.0));
        assert_eq!(eval("defined?", Value::Num(1.0)), Value::Num(1.0));
    }

    #[test]
    fn equality_with_undefined() {
        assert_eq!(eval("_ _ ==", Value::Num(0.0)), Value::Num(1.0));
        assert_eq!(eval("_ _ !=", Value::Num(0.0)), Value::Num(0.0));
        assert_eq!(eval("_ ==", Value::Num(5.0)), Value::Num(0.0));
        assert_eq!(eval("_ !=", Value::Num(5.0)), Value::Num(1.0));
        assert_eq!(eval("5 ==", Value::Num(5.0)), Value::Num(1.0));
        assert_eq!(eval("'eth0' ==", Value::str("eth0")), Value::Num(1.0));
    }

    #[test]
    fn ordering_with_undefined_is_false() {
        assert_eq!(eval("_ <", Value::Num(5.0)), Value::Num(0.0));
        assert_eq!(eval("10 <", Value::Num(5.0)), Value::Num(1.0));
        assert_eq!(eval("10 >=", Value::Num(5.0)), Value::Num(0.0));
    }

    #[test]
    fn ifelse_selects_branch() {
        // pred a b ifelse
        assert_eq!(eval("1 'yes' 'no' ifelse", Value::Num(0.0)), Value::str("yes"));
        assert_eq!(eval("0 'yes' 'no' ifelse", Value::Num(0.0)), Value::str("no"));
    }

    #[test]
    fn divide_by_zero_then_ifelse_takes_else() {
        let result = eval("0 / dup defined? exch '-' ifelse", Value::Num(5.0));
        assert_eq!(result, Value::str("-"));
    }

    #[test]
    fn match_yields_capture_group() {
        assert_eq!(
            eval("'^(eth)[0-9]+$' match", Value::str("eth0")),
            Value::str("eth")
        );
        assert_eq!(eval("'^xyz$' match", Value::str("eth0")), Value::Undefined);
        // 캡처 그룹이 없는 매치는 undefined
        assert_eq!(eval("'^eth' match", Value::str("eth0")), Value::Undefined);
    }

    #[test]
    fn replace_substitutes() {
        assert_eq!(
            eval("'eth' 'wan' replace", Value::str("eth0")),
            Value::str("wan0")
        );
        assert_eq!(eval("'x' _ replace", Value::str("eth0")), Value::Undefined);
    }

    #[test]
    fn concat_coerces_undefined_to_empty() {
        assert_eq!(eval("'-a' concat", Value::str("x")), Value::str("x-a"));
        assert_eq!(eval("_ concat", Value::str("x")), Value::str("x"));
        assert_eq!(eval("_ exch concat", Value::str("x")), Value::str("x"));
    }

    #[test]
    fn stack_ops_are_noop_on_underflow() {
        // pop 먼저: 스택이 비고, 최종 값은 undefined
        assert_eq!(eval("pop", Value::Num(5.0)), Value::Undefined);
        assert_eq!(eval("pop pop exch dup", Value::Num(5.0)), Value::Undefined);
    }

    #[test]
    fn dup_and_exch() {
        assert_eq!(eval("dup *", Value::Num(3.0)), Value::Num(9.0));
        assert_eq!(eval("10 exch -", Value::Num(3.0)), Value::Num(7.0));
    }

    #[test]
    fn index_copies_from_depth() {
        // 스택: [5, 9] → "2 index"는 아래에서 5를 복사
        assert_eq!(eval("9 2 index", Value::Num(5.0)), Value::Num(5.0));
        assert_eq!(eval("9 1 index", Value::Num(5.0)), Value::Num(9.0));
        assert_eq!(eval("0 index", Value::Num(5.0)), Value::Undefined);
        assert_eq!(eval("_ index", Value::Num(5.0)), Value::Undefined);
        assert_eq!(eval("99 index", Value::Num(5.0)), Value::Undefined);
    }

    #[test]
    fn row_field_hostvar_and_host_operands() {
        assert_eq!(eval("$speed /", Value::Num(500.0)), Value::Num(0.5));
        assert_eq!(eval("pop $name", Value::Num(0.0)), Value::str("eth0"));
        assert_eq!(eval("pop #site", Value::Num(0.0)), Value::str("seoul"));
        assert_eq!(eval("pop @", Value::Num(0.0)), Value::str("h1"));
        assert_eq!(eval("pop $missing", Value::Num(0.0)), Value::Undefined);
    }

    #[test]
    fn pow_and_exp() {
        assert_eq!(eval("2 10 pow", Value::Num(0.0)), Value::Num(1024.0));
        assert_eq!(eval("pop 0 exp", Value::Num(0.0)), Value::Num(1.0));
    }

    #[test]
    fn truthiness_ops() {
        assert_eq!(eval("1 and", Value::Num(2.0)), Value::Num(1.0));
        assert_eq!(eval("0 and", Value::Num(2.0)), Value::Num(0.0));
        assert_eq!(eval("0 or", Value::Num(0.0)), Value::Num(0.0));
        assert_eq!(eval("not", Value::Num(0.0)), Value::Num(1.0));
        assert_eq!(eval("not", Value::str("0")), Value::Num(1.0));
        assert_eq!(eval("not", Value::Undefined), Value::Num(1.0));
    }

    #[test]
    fn unknown_token_is_ignored() {
        assert_eq!(eval("bogus 2 *", Value::Num(3.0)), Value::Num(6.0));
    }

    #[test]
    fn quoted_strings_and_escapes() {
        assert_eq!(eval(r#"pop "a b""#, Value::Num(0.0)), Value::str("a b"));
        assert_eq!(eval(r#"pop 'it\'s'"#, Value::Num(0.0)), Value::str("it's"));
        // 닫히지 않은 따옴표: 남은 텍스트가 본문
        assert_eq!(eval("pop 'open end", Value::Num(0.0)), Value::str("open end"));
        // 끝에 걸린 백슬래시는 버림
        assert_eq!(eval("pop 'trail\\", Value::Num(0.0)), Value::str("trail"));
    }

    #[test]
    fn number_grammar() {
        assert!(is_number("5"));
        assert!(is_number("5."));
        assert!(is_number(".5"));
        assert!(is_number("+.5"));
        assert!(is_number("-12.75"));
        assert!(!is_number("."));
        assert!(!is_number("-"));
        assert!(!is_number("1.2.3"));
        assert!(!is_number("5e3"));
        assert!(!is_number("abc"));
    }
}
