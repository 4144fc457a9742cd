//! バックトレースの解析
//!
//! バックトレースは外側の呼び出しから順に1行ずつ出力されます。
//! 現在のフレームには `> ` が、それ以外には2文字のインデントが付きます。
//!
//! ```text
//!   /python/math.py(14)main()
//! -> print cube(3)
//!   /python/math.py(7)cube()
//! -> x = square(a)
//! > /python/math.py(2)square()
//! -> def square(a):
//! ```

use crate::Result;
use regex::Regex;
use std::fs::File;
use std::path::Path;

/// スタックフレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// スタックの深さ（0 が最も内側の呼び出し）
    pub level: usize,
    /// ソースファイル
    pub file: String,
    /// 行番号
    pub line: u32,
    /// 関数名
    pub function: String,
    /// ソースファイルを読み取れるかどうか
    pub usable: bool,
}

/// 解析済みのバックトレース
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backtrace {
    /// フレーム（0 が最も内側）
    pub frames: Vec<StackFrame>,
    /// 現在のフレームのインデックス
    pub current: Option<usize>,
}

/// バックトレースパーサ
pub struct FrameParser {
    /// フレーム行のパターン: `<marker><file>(<line>)<function>`
    frame_line: Regex,
}

impl FrameParser {
    /// 新しいパーサを作成する
    pub fn new() -> Result<Self> {
        let frame_line =
            Regex::new(r"^(?P<marker>> |  )(?P<file>[^(]*)\((?P<line>\d+)\)(?P<function>.*)$")
                .map_err(|e| anyhow::anyhow!("Failed to compile frame pattern: {}", e))?;
        Ok(Self { frame_line })
    }

    /// バックトレースを解析する
    ///
    /// 行番号が正でソースファイルが存在するフレームだけを残し、
    /// 出力順を逆にして 0 が最も内側の呼び出しになるよう番号を振り直します。
    pub fn parse(&self, block: &str) -> Backtrace {
        let mut frames: Vec<StackFrame> = Vec::new();
        let mut current = None;

        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            let caps = match self.frame_line.captures(line) {
                Some(caps) => caps,
                None => continue,
            };

            let line_number: u32 = match caps["line"].parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let file = caps["file"].to_string();
            if line_number == 0 || !Path::new(&file).exists() {
                continue;
            }

            // 出力順での位置
            let stream_level = frames.len();
            if &caps["marker"] == "> " {
                current = Some(stream_level);
            }

            frames.push(StackFrame {
                level: stream_level,
                usable: File::open(&file).is_ok(),
                file,
                line: line_number,
                function: demangle_function(&caps["function"]),
            });
        }

        frames.reverse();
        let count = frames.len();
        for frame in &mut frames {
            frame.level = count - frame.level - 1;
        }

        Backtrace {
            frames,
            current: current.map(|index| count - index - 1),
        }
    }
}

/// マングルされた関数名を復元する（`name(args)` の name 部分のみ）
fn demangle_function(function: &str) -> String {
    let (name, rest) = match function.find('(') {
        Some(pos) => function.split_at(pos),
        None => (function, ""),
    };

    if name.starts_with("_ZN") || name.starts_with("_R") {
        if let Ok(demangled) = rustc_demangle::try_demangle(name) {
            return format!("{:#}{}", demangled, rest);
        }
    }
    function.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source_file(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        writeln!(file, "def {}(): pass", name).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_parse_filters_and_reverses() {
        let dir = tempfile::tempdir().unwrap();
        let math = source_file(&dir, "math.py");
        let util = source_file(&dir, "util.py");

        let block = format!(
            "  /usr/lib/python2.6/nonexistent_bdb.py(368)run()\n\
             -> exec cmd in globals, locals\n\
             \x20 <string>(1)<module>()\n\
             \x20 {math}(14)main()\n\
             -> print cube(3)\n\
             \x20 {util}(7)cube()\n\
             -> x = square(a)\n\
             > {math}(2)square()\n\
             -> def square(a):"
        );

        let parser = FrameParser::new().unwrap();
        let backtrace = parser.parse(&block);

        let functions: Vec<_> = backtrace.frames.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(functions, vec!["square()", "cube()", "main()"]);

        let levels: Vec<_> = backtrace.frames.iter().map(|f| f.level).collect();
        assert_eq!(levels, vec![0, 1, 2]);

        assert_eq!(backtrace.current, Some(0));
        assert_eq!(backtrace.frames[0].file, math);
        assert_eq!(backtrace.frames[0].line, 2);
        assert!(backtrace.frames.iter().all(|f| f.usable));
    }

    #[test]
    fn test_current_frame_not_innermost() {
        let dir = tempfile::tempdir().unwrap();
        let a = source_file(&dir, "a.py");
        let b = source_file(&dir, "b.py");
        let c = source_file(&dir, "c.py");

        // 現在のフレームは出力順で2番目（外側から数えて1）
        let block = format!("  {a}(1)outer()\n> {b}(2)middle()\n  {c}(3)inner()\n");

        let backtrace = FrameParser::new().unwrap().parse(&block);
        assert_eq!(backtrace.frames.len(), 3);
        assert_eq!(backtrace.current, Some(1));
        assert_eq!(backtrace.frames[1].function, "middle()");
        assert_eq!(backtrace.frames[2].function, "outer()");
    }

    #[test]
    fn test_current_frame_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let a = source_file(&dir, "a.py");

        let block = format!("  {a}(1)outer()\n> /does/not/exist.py(2)inner()\n");
        let backtrace = FrameParser::new().unwrap().parse(&block);
        assert_eq!(backtrace.frames.len(), 1);
        assert_eq!(backtrace.current, None);
    }

    #[test]
    fn test_zero_line_and_garbage_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let a = source_file(&dir, "a.py");

        let block = format!("garbage line\n  {a}(0)zero()\n  {a}(abc)bad()\n  {a}(5)good()");
        let backtrace = FrameParser::new().unwrap().parse(&block);
        assert_eq!(backtrace.frames.len(), 1);
        assert_eq!(backtrace.frames[0].function, "good()");
        assert_eq!(backtrace.frames[0].level, 0);
    }

    #[test]
    fn test_demangle_function() {
        assert_eq!(
            demangle_function("_ZN4core3fmt5write17h0123456789abcdefE()"),
            "core::fmt::write()"
        );
        assert_eq!(demangle_function("square()"), "square()");
    }
}
