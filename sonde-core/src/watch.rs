//! 変数ツリーのモデル
//!
//! 取得結果は iname をキーにした差分更新として適用します。応答に含まれなかった
//! 項目や、応答に含まれなかったフィールドは前回の値のまま残ります。

use sonde_mi::WatchItem;
use std::collections::{BTreeMap, BTreeSet};

/// ウォッチ式の iname 接頭辞
pub const WATCH_PREFIX: &str = "watch";

/// ツールチップ式の iname 接頭辞
pub const TOOLTIP_PREFIX: &str = "tooltip";

/// 変数取得の表示オプション
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// デバッグヘルパーによる整形（`fancy`）
    pub fancy: bool,
    /// ポインタの自動参照（`autoderef`）
    pub autoderef: bool,
}

/// 変数取得コマンドの引数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// コンマ区切りのオプション
    pub options: String,
    /// 展開する iname（コンマ区切り）
    pub expanded: String,
    /// 型ごとの表示形式
    pub type_formats: String,
    /// 項目ごとの表示形式
    pub individual_formats: String,
    /// `expr#iname` を `##` で連結し16進エンコードしたもの
    pub watchers: String,
}

/// 変数ツリー
#[derive(Debug, Default)]
pub struct WatchHandler {
    items: BTreeMap<String, WatchItem>,
    expanded: BTreeSet<String>,
    type_formats: BTreeMap<String, String>,
    individual_formats: BTreeMap<String, String>,
    /// ウォッチ式 → 番号
    watchers: BTreeMap<String, usize>,
    next_watcher: usize,
}

impl WatchHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得結果を差分として適用する
    pub fn insert_data(&mut self, items: Vec<WatchItem>) {
        for item in items {
            match self.items.get_mut(&item.iname) {
                Some(existing) => merge_item(existing, item),
                None => {
                    self.items.insert(item.iname.clone(), item);
                }
            }
        }
    }

    pub fn item(&self, iname: &str) -> Option<&WatchItem> {
        self.items.get(iname)
    }

    /// 全ての項目を iname 順に返す
    pub fn items(&self) -> impl Iterator<Item = &WatchItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 項目とその子孫を取り除く
    pub fn remove_subtree(&mut self, iname: &str) {
        let nested = format!("{}.", iname);
        self.items
            .retain(|key, _| key != iname && !key.starts_with(&nested));
    }

    /// 展開状態を設定する
    pub fn set_expanded(&mut self, iname: &str, expanded: bool) {
        if expanded {
            self.expanded.insert(iname.to_string());
        } else {
            self.expanded.remove(iname);
        }
    }

    pub fn expanded(&self) -> &BTreeSet<String> {
        &self.expanded
    }

    /// 型ごとの表示形式を設定する（空なら解除）
    pub fn set_type_format(&mut self, type_name: &str, format: &str) {
        if format.is_empty() {
            self.type_formats.remove(type_name);
        } else {
            self.type_formats
                .insert(type_name.to_string(), format.to_string());
        }
    }

    /// 項目ごとの表示形式を設定する（空なら解除）
    pub fn set_individual_format(&mut self, iname: &str, format: &str) {
        if format.is_empty() {
            self.individual_formats.remove(iname);
        } else {
            self.individual_formats
                .insert(iname.to_string(), format.to_string());
        }
    }

    /// ウォッチ式を登録し、その iname を返す
    pub fn add_watcher(&mut self, expression: &str) -> String {
        let id = match self.watchers.get(expression) {
            Some(&id) => id,
            None => {
                let id = self.next_watcher;
                self.next_watcher += 1;
                self.watchers.insert(expression.to_string(), id);
                id
            }
        };
        format!("{}.{}", WATCH_PREFIX, id)
    }

    /// ウォッチ式の登録を解除する
    pub fn remove_watcher(&mut self, expression: &str) -> bool {
        match self.watchers.remove(expression) {
            Some(id) => {
                self.remove_subtree(&format!("{}.{}", WATCH_PREFIX, id));
                true
            }
            None => false,
        }
    }

    /// 登録済みのウォッチ式（式, iname）
    pub fn watchers(&self) -> impl Iterator<Item = (&str, String)> {
        self.watchers
            .iter()
            .map(|(exp, id)| (exp.as_str(), format!("{}.{}", WATCH_PREFIX, id)))
    }

    /// 取得コマンドの引数を組み立てる
    ///
    /// `extra` は一時的な式（ツールチップなど）で、登録済みのウォッチ式の後に続きます。
    pub fn fetch_request(&self, options: FetchOptions, extra: &[(String, String)]) -> FetchRequest {
        let mut opts = Vec::new();
        if options.fancy {
            opts.push("fancy");
        }
        if options.autoderef {
            opts.push("autoderef");
        }
        if opts.is_empty() {
            opts.push("defaults");
        }

        let expanded = self
            .expanded
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let type_formats = self
            .type_formats
            .iter()
            .map(|(ty, fmt)| format!("{}={}", hex::encode(ty), fmt))
            .collect::<Vec<_>>()
            .join(",");

        let individual_formats = self
            .individual_formats
            .iter()
            .map(|(iname, fmt)| format!("{}={}", iname, fmt))
            .collect::<Vec<_>>()
            .join(",");

        let watchers = self
            .watchers()
            .map(|(exp, iname)| format!("{}#{}", exp, iname))
            .chain(extra.iter().map(|(exp, iname)| format!("{}#{}", exp, iname)))
            .collect::<Vec<_>>()
            .join("##");

        FetchRequest {
            options: opts.join(","),
            expanded,
            type_formats,
            individual_formats,
            watchers: hex::encode(watchers),
        }
    }
}

/// 応答に含まれていたフィールドだけを上書きする
fn merge_item(existing: &mut WatchItem, update: WatchItem) {
    existing.name = update.name;
    if update.exp.is_some() {
        existing.exp = update.exp;
    }
    if update.value.is_some() {
        existing.value = update.value;
    }
    if update.type_name.is_some() {
        existing.type_name = update.type_name;
    }
    if update.child_count.is_some() {
        existing.child_count = update.child_count;
    }
    if update.children_fetched {
        existing.children = update.children;
        existing.children_fetched = true;
    }
}
