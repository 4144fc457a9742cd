//! 変数ダンプの解析
//!
//! 応答はタグ付きレコードの並びで、各レコードは少なくとも `iname` と `name` を持ちます。
//! `children=[...]` を持つレコードは再帰的に展開され、親の後に子が続く平坦な
//! リストになります。

use crate::{MiKind, MiValue};
use std::collections::BTreeSet;
use tracing::warn;

/// ウォッチ項目
///
/// 応答に含まれなかったフィールドは None のまま残り、既存の値を上書きしません。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchItem {
    /// 階層パス（例: `local.x.y`）
    pub iname: String,
    /// 表示名
    pub name: String,
    /// 評価式
    pub exp: Option<String>,
    /// 値
    pub value: Option<String>,
    /// 型名
    pub type_name: Option<String>,
    /// 子の数
    pub child_count: Option<usize>,
    /// 子項目の iname（出力順）
    pub children: Vec<String>,
    /// 子項目を取得済みかどうか
    pub children_fetched: bool,
}

impl WatchItem {
    /// 新しい項目を作成する
    pub fn new(iname: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            iname: iname.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// 親項目の iname（トップレベルなら None）
    pub fn parent_iname(&self) -> Option<&str> {
        self.iname.rfind('.').map(|pos| &self.iname[..pos])
    }

    /// 子を持つかどうか
    pub fn has_children(&self) -> bool {
        self.child_count.map_or(!self.children.is_empty(), |n| n > 0)
    }
}

/// 親レコードから子へ引き継ぐ情報
struct ParentContext<'a> {
    iname: &'a str,
    child_type: Option<&'a str>,
    child_count: Option<usize>,
}

/// 変数ダンプの応答を解析する
///
/// `expanded` に含まれる iname は展開済みとして扱い、子が届かなかった場合は
/// 未取得（`children_fetched == false`）として記録します。
pub fn parse_watch_records(block: &str, expanded: &BTreeSet<String>) -> Vec<WatchItem> {
    let all = MiValue::parse_multiple(block.trim());
    let mut items = Vec::new();

    for record in all.children.iter().flat_map(records_of) {
        parse_watch_data(expanded, record, None, &mut items);
    }

    items
}

/// `data=[...]` のようなリストならその要素を、タプルならそれ自身を返す
fn records_of(value: &MiValue) -> Vec<&MiValue> {
    match value.kind {
        MiKind::List => value.children.iter().collect(),
        MiKind::Tuple => vec![value],
        _ => Vec::new(),
    }
}

fn parse_watch_data(
    expanded: &BTreeSet<String>,
    record: &MiValue,
    parent: Option<&ParentContext<'_>>,
    out: &mut Vec<WatchItem>,
) {
    if record.kind != MiKind::Tuple {
        warn!("Skipping watch record that is not a tuple: {:?}", record);
        return;
    }

    let name = record.data_of("name").map(str::to_string);
    let iname = match (record.data_of("iname"), parent, &name) {
        (Some(iname), _, _) => iname.to_string(),
        (None, Some(parent), Some(name)) => format!("{}.{}", parent.iname, name),
        _ => {
            warn!("Skipping watch record without iname: {:?}", record);
            return;
        }
    };
    let name = name.unwrap_or_else(|| iname.rsplit('.').next().unwrap_or(&iname).to_string());

    let mut item = WatchItem::new(iname, name);
    item.exp = record.data_of("exp").map(str::to_string);
    item.value = decode_value(record);
    item.type_name = record
        .data_of("type")
        .or_else(|| parent.and_then(|p| p.child_type))
        .map(str::to_string);
    item.child_count = record
        .data_of("numchild")
        .and_then(|n| n.parse().ok())
        .or_else(|| parent.and_then(|p| p.child_count));

    let index = out.len();
    out.push(item);

    let children = match record.child("children") {
        Some(children) if children.kind == MiKind::List => children,
        _ => return,
    };

    let parent_iname = out[index].iname.clone();
    let context = ParentContext {
        iname: &parent_iname,
        child_type: record.data_of("childtype"),
        child_count: record.data_of("childnumchild").and_then(|n| n.parse().ok()),
    };

    let mut child_inames = Vec::with_capacity(children.children.len());
    for (i, child) in children.children.iter().enumerate() {
        let before = out.len();
        let unnamed = child.data_of("name").is_none() && child.data_of("iname").is_none();
        if child.kind == MiKind::Tuple && unnamed {
            // 名前のない要素は添字を名前にする
            let mut named = child.clone();
            named.children.push(MiValue {
                name: "name".to_string(),
                data: i.to_string(),
                kind: MiKind::Const,
                children: Vec::new(),
            });
            parse_watch_data(expanded, &named, Some(&context), out);
        } else {
            parse_watch_data(expanded, child, Some(&context), out);
        }
        if out.len() > before {
            child_inames.push(out[before].iname.clone());
        }
    }

    let parent_item = &mut out[index];
    if parent_item.child_count.is_none() {
        parent_item.child_count = Some(child_inames.len());
    }
    parent_item.children_fetched =
        expanded.contains(&parent_item.iname) || !child_inames.is_empty();
    parent_item.children = child_inames;
}

/// `valueencoded` に従って値を復元する
fn decode_value(record: &MiValue) -> Option<String> {
    let value = record.data_of("value")?;
    match record.data_of("valueencoded") {
        Some("hex") | Some("1") => match hex::decode(value) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("Failed to decode hex value '{}': {}", value, e);
                Some(value.to_string())
            }
        },
        _ => Some(value.to_string()),
    }
}
