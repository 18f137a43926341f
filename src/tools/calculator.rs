//! Calculator 工具：安全的算术表达式求值（递归下降，不执行任意代码）
//!
//! 支持 + - * / % ^ **、括号、一元正负号、常量 pi / e / tau 以及常用数学函数；未知标识符直接拒绝。
//! `^` 与 `**` 同为乘方（不是按位异或）；`%` 为向下取整取模，结果与除数同号（`7 % -4 == -1`）。
//! 表达式长度与嵌套深度都有上限，超出时返回错误而不是耗尽栈。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::parameters_schema_for;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct CalculatorArgs {
    #[schemars(description = "The mathematical expression to evaluate (e.g., '2*pi*5').")]
    expression: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    Pow,
    LParen,
    RParen,
    Comma,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // 科学计数法：1e3 / 2.5E-4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(c));
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

/// 表达式最大长度（字节）
const MAX_EXPRESSION_LEN: usize = 1024;
/// 最大嵌套深度（括号、一元运算符、乘方右侧、函数参数）
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(format!("expected {:?}, found {:?}", want, t)),
            None => Err(format!("expected {:?}, found end of input", want)),
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = match op {
                '*' => acc * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                '/' => acc / rhs,
                _ => acc - rhs * (acc / rhs).floor(),
            };
        }
        Ok(acc)
    }

    // 所有递归路径都经过 unary，在此统一限制深度
    fn unary(&mut self) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression too deeply nested".to_string());
        }
        self.depth += 1;
        let result = self.unary_inner();
        self.depth -= 1;
        result
    }

    fn unary_inner(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // 右结合：2^3^2 = 2^9
    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if let Some(Token::Pow) = self.peek() {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let v = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(v)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if let Some(Token::RParen) = self.peek() {
                        self.pos += 1;
                    } else {
                        loop {
                            args.push(self.expr()?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                _ => return Err(format!("malformed call to {}", name)),
                            }
                        }
                    }
                    call_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(t) => Err(format!("unexpected token {:?}", t)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn constant(name: &str) -> Result<f64, String> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        "tau" => Ok(std::f64::consts::TAU),
        "inf" => Ok(f64::INFINITY),
        _ => Err(format!("Use of {} is not allowed", name)),
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64, String> {
    let unary = |f: fn(f64) -> f64| -> Result<f64, String> {
        match args {
            [x] => Ok(f(*x)),
            _ => Err(format!("{}() takes exactly one argument", name)),
        }
    };
    match name {
        "sqrt" => unary(f64::sqrt),
        "abs" | "fabs" => unary(f64::abs),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "asin" => unary(f64::asin),
        "acos" => unary(f64::acos),
        "atan" => unary(f64::atan),
        "sinh" => unary(f64::sinh),
        "cosh" => unary(f64::cosh),
        "tanh" => unary(f64::tanh),
        "exp" => unary(f64::exp),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(f64::round),
        "log10" => unary(f64::log10),
        "log2" => unary(f64::log2),
        "degrees" => unary(f64::to_degrees),
        "radians" => unary(f64::to_radians),
        "log" => match args {
            [x] => Ok(x.ln()),
            [x, base] => Ok(x.log(*base)),
            _ => Err("log() takes one or two arguments".to_string()),
        },
        "pow" => match args {
            [x, y] => Ok(x.powf(*y)),
            _ => Err("pow() takes exactly two arguments".to_string()),
        },
        "atan2" => match args {
            [y, x] => Ok(y.atan2(*x)),
            _ => Err("atan2() takes exactly two arguments".to_string()),
        },
        "min" if !args.is_empty() => Ok(args.iter().cloned().fold(f64::INFINITY, f64::min)),
        "max" if !args.is_empty() => Ok(args.iter().cloned().fold(f64::NEG_INFINITY, f64::max)),
        _ => Err(format!("Use of {} is not allowed", name)),
    }
}

/// 求值表达式
pub fn evaluate(expression: &str) -> Result<f64, String> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(format!(
            "expression too long ({} bytes, max {})",
            expression.len(),
            MAX_EXPRESSION_LEN
        ));
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(t) = parser.peek() {
        return Err(format!("unexpected token {:?}", t));
    }
    if value.is_nan() {
        return Err("math domain error".to_string());
    }
    Ok(value)
}

/// 整数结果不带小数点
fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

/// Calculator 工具
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression (arithmetic, parentheses, pi/e, sqrt, log, sin, cos, pow, ...)."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<CalculatorArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: CalculatorArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        evaluate(&args.expression)
            .map(format_number)
            .map_err(|e| format!("Error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(evaluate("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("2 ** 10").unwrap(), 1024.0);
        assert_eq!(evaluate("-2 ^ 2").unwrap(), -4.0);
        assert_eq!(evaluate("7 % 4").unwrap(), 3.0);
        assert_eq!(evaluate("1.5e2").unwrap(), 150.0);
    }

    #[test]
    fn test_modulo_follows_divisor_sign() {
        assert_eq!(evaluate("7 % -4").unwrap(), -1.0);
        assert_eq!(evaluate("-7 % 4").unwrap(), 1.0);
        assert_eq!(evaluate("-7 % -4").unwrap(), -3.0);
        assert_eq!(evaluate("7.5 % 2").unwrap(), 1.5);
        assert!(evaluate("1 % 0").is_err());
    }

    #[test]
    fn test_caret_is_power() {
        assert_eq!(evaluate("2^3").unwrap(), 8.0);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let nested = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(evaluate(&nested).unwrap_err().contains("too long"));

        let parens = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&parens).unwrap_err(), "expression too deeply nested");
        let minuses = format!("{}1", "-".repeat(500));
        assert_eq!(evaluate(&minuses).unwrap_err(), "expression too deeply nested");
        let powers = vec!["2"; 200].join("^");
        assert_eq!(evaluate(&powers).unwrap_err(), "expression too deeply nested");

        let ok = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(evaluate(&ok).unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_deep_nesting_is_error_result() {
        let nested = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let result = CalculatorTool.execute(json!({ "expression": nested })).await;
        assert!(result.is_err());
        let parens = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        let result = CalculatorTool.execute(json!({ "expression": parens })).await;
        assert_eq!(result.unwrap_err(), "Error: expression too deeply nested");
    }

    #[test]
    fn test_functions_and_constants() {
        assert!((evaluate("2*pi*5").unwrap() - 31.415926535).abs() < 1e-6);
        assert_eq!(evaluate("sqrt(16) + abs(-2)").unwrap(), 6.0);
        assert_eq!(evaluate("max(1, 5, 3)").unwrap(), 5.0);
        assert!((evaluate("log(8, 2)").unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(evaluate("").is_err());
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("import(os)").is_err());
        assert!(evaluate("__builtins__").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 2").is_err());
        assert!(evaluate("sqrt(-1)").is_err());
    }

    #[tokio::test]
    async fn test_tool_execute() {
        let tool = CalculatorTool;
        assert_eq!(tool.execute(json!({"expression": "6*7"})).await.unwrap(), "42");
        assert_eq!(tool.execute(json!({"expression": "1/4"})).await.unwrap(), "0.25");
        assert!(tool.execute(json!({"expression": "foo + 1"})).await.is_err());
    }
}
