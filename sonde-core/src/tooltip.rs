//! ツールチップ式の評価
//!
//! 評価結果は式ごとにセッション中キャッシュされ、再開時に破棄されます。

use sonde_mi::WatchItem;
use std::collections::HashMap;

/// 評価要求の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTipOutcome {
    /// 評価せずに利用者へ表示するメッセージ
    Message(String),
    /// 何もしない
    Ignored,
    /// キャッシュ済みの結果
    Cached(WatchItem),
    /// 評価を要求した（式, iname）
    Requested { expression: String, iname: String },
}

/// ツールチップの状態
#[derive(Debug, Default)]
pub struct ToolTipState {
    cache: HashMap<String, WatchItem>,
    /// 結果待ちの iname → 式
    pending: HashMap<String, String>,
    next_id: usize,
}

impl ToolTipState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 式を評価できるか判定し、必要なら評価用の iname を割り当てる
    pub fn request(&mut self, expression: &str) -> ToolTipOutcome {
        let exp = expression.trim();
        if exp.is_empty() || exp.starts_with('#') {
            return ToolTipOutcome::Ignored;
        }
        if !has_letter_or_number(exp) {
            return ToolTipOutcome::Message(format!("'{}' contains no identifier", exp));
        }
        if exp.len() >= 2 && exp.starts_with('"') && exp.ends_with('"') {
            return ToolTipOutcome::Message(format!("String literal {}", exp));
        }

        let exp = strip_increments(exp);
        if exp.starts_with('<') || exp.starts_with('[') {
            return ToolTipOutcome::Ignored;
        }
        if has_side_effects(exp) {
            return ToolTipOutcome::Message(format!(
                "Cowardly refusing to evaluate expression '{}' with potential side effects",
                exp
            ));
        }

        if let Some(item) = self.cache.get(exp) {
            return ToolTipOutcome::Cached(item.clone());
        }

        if let Some((iname, _)) = self.pending.iter().find(|(_, e)| e.as_str() == exp) {
            return ToolTipOutcome::Requested {
                expression: exp.to_string(),
                iname: iname.clone(),
            };
        }

        let iname = format!("{}.{}", crate::watch::TOOLTIP_PREFIX, self.next_id);
        self.next_id += 1;
        self.pending.insert(iname.clone(), exp.to_string());
        ToolTipOutcome::Requested {
            expression: exp.to_string(),
            iname,
        }
    }

    /// 結果待ちの（式, iname）
    pub fn pending(&self) -> Vec<(String, String)> {
        let mut pending: Vec<_> = self
            .pending
            .iter()
            .map(|(iname, exp)| (exp.clone(), iname.clone()))
            .collect();
        pending.sort_by(|a, b| a.1.cmp(&b.1));
        pending
    }

    /// 取得結果から結果待ちの式を解決し、（式, 項目）を返す
    pub fn resolve(&mut self, items: &[WatchItem]) -> Vec<(String, WatchItem)> {
        let mut resolved = Vec::new();
        for item in items {
            if let Some(exp) = self.pending.remove(&item.iname) {
                self.cache.insert(exp.clone(), item.clone());
                resolved.push((exp, item.clone()));
            }
        }
        resolved
    }

    /// 再開時にキャッシュを破棄する
    ///
    /// 結果待ちの式も捨てるので、iname の番号は 0 から振り直します。
    pub fn clear(&mut self) {
        self.cache.clear();
        self.pending.clear();
        self.next_id = 0;
    }
}

/// 英数字または '_' を含むかどうか
pub fn has_letter_or_number(exp: &str) -> bool {
    exp.chars().any(|c| c.is_alphanumeric() || c == '_')
}

/// 代入やインクリメントなど副作用のありそうな式かどうか
pub fn has_side_effects(exp: &str) -> bool {
    const COMPOUND: [&str; 12] = [
        "<<=", ">>=", "-=", "+=", "/=", "%=", "*=", "&=", "|=", "^=", "--", "++",
    ];
    if COMPOUND.iter().any(|op| exp.contains(op)) {
        return true;
    }

    // '==', '<=', '>=', '!=' 以外の '='
    let bytes = exp.as_bytes();
    bytes.iter().enumerate().any(|(i, &c)| {
        if c != b'=' {
            return false;
        }
        let prev = if i > 0 { bytes[i - 1] } else { 0 };
        let next = bytes.get(i + 1).copied().unwrap_or(0);
        !matches!(prev, b'=' | b'<' | b'>' | b'!') && next != b'='
    })
}

/// 先頭と末尾の `++` / `--` を取り除く
fn strip_increments(exp: &str) -> &str {
    let exp = exp
        .strip_prefix("++")
        .or_else(|| exp.strip_prefix("--"))
        .unwrap_or(exp);
    exp.strip_suffix("++")
        .or_else(|| exp.strip_suffix("--"))
        .unwrap_or(exp)
}
