//! タグ付きレコード（GDB/MI 形式の値）の解析
//!
//! 変数ダンプなどの応答は `name="value"`、`{...}`（タプル）、`[...]`（リスト）を
//! 入れ子にした形式で出力されます。
//!
//! ```text
//! {iname="local.x",name="x",value="1",type="int",numchild="0"}
//! ```

use crate::ParseError;
use tracing::warn;

/// 値の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MiKind {
    /// 無効（見つからなかった子など）
    #[default]
    Invalid,
    /// 文字列定数
    Const,
    /// `{...}`
    Tuple,
    /// `[...]`
    List,
}

/// レコードの値
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MiValue {
    /// 名前（リストの要素では空）
    pub name: String,
    /// 定数の内容
    pub data: String,
    /// 種類
    pub kind: MiKind,
    /// 子要素
    pub children: Vec<MiValue>,
}

impl MiValue {
    /// 1つの値を解析する（`name=` を含んでもよい）
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut parser = Parser::new(input);
        parser.skip_whitespace();
        let value = parser.parse_result()?;
        parser.skip_whitespace();
        if !parser.at_end() {
            return Err(parser.error("trailing characters after value"));
        }
        Ok(value)
    }

    /// コンマまたは改行で区切られた複数の値を解析し、1つのタプルにまとめる
    ///
    /// 壊れたレコードは次の行まで読み飛ばし、解析できた部分だけを返します。
    pub fn parse_multiple(input: &str) -> Self {
        let mut all = MiValue {
            kind: MiKind::Tuple,
            ..Default::default()
        };
        let mut parser = Parser::new(input);

        loop {
            parser.skip_separators();
            if parser.at_end() {
                break;
            }
            let start = parser.pos;
            match parser.parse_result() {
                Ok(value) => all.children.push(value),
                Err(e) => {
                    warn!("Skipping malformed record: {}", e);
                    parser.skip_line();
                    if parser.pos == start {
                        break;
                    }
                }
            }
        }

        all
    }

    /// 名前で子要素を探す
    pub fn child(&self, name: &str) -> Option<&MiValue> {
        self.children.iter().find(|c| c.name == name)
    }

    /// 名前で子要素を探し、定数の内容を返す
    pub fn data_of(&self, name: &str) -> Option<&str> {
        self.child(name)
            .filter(|c| c.kind == MiKind::Const)
            .map(|c| c.data.as_str())
    }
}

/// 再帰下降パーサ
struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn error(&self, reason: &'static str) -> ParseError {
        ParseError::Syntax {
            offset: self.pos,
            reason,
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace() || c == b',') {
            self.pos += 1;
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\n' {
                break;
            }
        }
    }

    /// `[name=]value`
    fn parse_result(&mut self) -> Result<MiValue, ParseError> {
        let name = match self.peek() {
            Some(b'"') | Some(b'{') | Some(b'[') => String::new(),
            Some(_) => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == b'=' {
                        break;
                    }
                    if c == b',' || c == b'}' || c == b']' || c == b'\n' {
                        return Err(self.error("expected '=' after name"));
                    }
                    self.pos += 1;
                }
                if self.at_end() {
                    return Err(self.error("unexpected end of input in name"));
                }
                let name = String::from_utf8_lossy(&self.input[start..self.pos])
                    .trim()
                    .to_string();
                self.pos += 1; // '='
                name
            }
            None => return Err(self.error("unexpected end of input")),
        };

        let mut value = self.parse_value()?;
        value.name = name;
        Ok(value)
    }

    fn parse_value(&mut self) -> Result<MiValue, ParseError> {
        match self.peek() {
            Some(b'"') => {
                let data = self.parse_const()?;
                Ok(MiValue {
                    data,
                    kind: MiKind::Const,
                    ..Default::default()
                })
            }
            Some(b'{') => self.parse_container(MiKind::Tuple, b'}'),
            Some(b'[') => self.parse_container(MiKind::List, b']'),
            _ => Err(self.error("expected '\"', '{' or '['")),
        }
    }

    fn parse_container(&mut self, kind: MiKind, close: u8) -> Result<MiValue, ParseError> {
        self.pos += 1; // '{' or '['
        let mut value = MiValue {
            kind,
            ..Default::default()
        };

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(value);
                }
                Some(b',') => {
                    self.pos += 1;
                }
                Some(_) => value.children.push(self.parse_result()?),
                None => return Err(self.error("unterminated container")),
            }
        }
    }

    fn parse_const(&mut self) -> Result<String, ParseError> {
        self.pos += 1; // '"'
        let mut out = Vec::new();

        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                b'"' => return Ok(String::from_utf8_lossy(&out).into_owned()),
                b'\\' => {
                    let escaped = self
                        .peek()
                        .ok_or_else(|| self.error("unterminated escape"))?;
                    self.pos += 1;
                    match escaped {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        other => {
                            out.push(b'\\');
                            out.push(other);
                        }
                    }
                }
                other => out.push(other),
            }
        }

        Err(self.error("unterminated string"))
    }
}
