//! ブレークポイントのモデル
//!
//! 挿入は `InsertRequested → InsertProceeding → Inserted | InsertFailed`、
//! 削除は `RemoveRequested → RemoveProceeding → (削除)` の順に進みます。

use crate::ProtocolError;
use sonde_mi::BreakpointResponse;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// モデル側のブレークポイントID
pub type BreakpointModelId = usize;

/// ブレークポイントの位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointLocation {
    /// 関数名
    Function(String),
    /// ファイルと行番号
    FileAndLine { file: String, line: u32 },
}

impl BreakpointLocation {
    /// `file:line` または関数名から位置を作る
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some((file, line)) = text.rsplit_once(':') {
            if let Ok(line) = line.parse::<u32>() {
                if !file.is_empty() && line > 0 {
                    return Some(BreakpointLocation::FileAndLine {
                        file: file.to_string(),
                        line,
                    });
                }
            }
        }
        Some(BreakpointLocation::Function(text.to_string()))
    }
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakpointLocation::Function(name) => write!(f, "{}", name),
            BreakpointLocation::FileAndLine { file, line } => write!(f, "{}:{}", file, line),
        }
    }
}

/// 利用者が指定する設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointParameters {
    pub location: BreakpointLocation,
    pub enabled: bool,
    /// 停止条件（空なら無条件）
    pub condition: Option<String>,
}

impl BreakpointParameters {
    /// 有効・無条件のブレークポイント
    pub fn new(location: BreakpointLocation) -> Self {
        Self {
            location,
            enabled: true,
            condition: None,
        }
    }
}

/// 同期状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState {
    InsertRequested,
    InsertProceeding,
    Inserted,
    InsertFailed,
    RemoveRequested,
    RemoveProceeding,
}

/// ブレークポイント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: BreakpointModelId,
    pub params: BreakpointParameters,
    pub state: BreakpointState,
    /// ツールの応答（挿入が確定するまで None）
    pub response: Option<BreakpointResponse>,
}

/// ブレークポイント一覧
pub struct BreakHandler {
    breakpoints: BTreeMap<BreakpointModelId, Breakpoint>,
    next_id: BreakpointModelId,
}

impl BreakHandler {
    /// 空の一覧を作成する
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// ブレークポイントを追加する（挿入待ち）
    pub fn add(&mut self, params: BreakpointParameters) -> BreakpointModelId {
        let id = self.next_id;
        self.next_id += 1;
        self.breakpoints.insert(
            id,
            Breakpoint {
                id,
                params,
                state: BreakpointState::InsertRequested,
                response: None,
            },
        );
        id
    }

    pub fn get(&self, id: BreakpointModelId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    /// 全てのブレークポイントを ID 順に取得する
    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn count(&self) -> usize {
        self.breakpoints.len()
    }

    /// ツール側の番号からモデル側の ID を探す
    pub fn find_by_response_id(&self, response_id: u32) -> Option<BreakpointModelId> {
        self.breakpoints
            .values()
            .find(|bp| bp.response.as_ref().map(|r| r.id) == Some(response_id))
            .map(|bp| bp.id)
    }

    /// 挿入待ちのブレークポイント
    pub fn pending_insertions(&self) -> Vec<BreakpointModelId> {
        self.in_state(BreakpointState::InsertRequested)
    }

    /// 削除待ちのブレークポイント
    pub fn pending_removals(&self) -> Vec<BreakpointModelId> {
        self.in_state(BreakpointState::RemoveRequested)
    }

    fn in_state(&self, state: BreakpointState) -> Vec<BreakpointModelId> {
        self.breakpoints
            .values()
            .filter(|bp| bp.state == state)
            .map(|bp| bp.id)
            .collect()
    }

    fn transition(
        &mut self,
        id: BreakpointModelId,
        from: &[BreakpointState],
        to: BreakpointState,
    ) -> Result<&mut Breakpoint, ProtocolError> {
        let bp = self
            .breakpoints
            .get_mut(&id)
            .ok_or(ProtocolError::UnknownBreakpoint(id))?;
        if !from.contains(&bp.state) {
            warn!("Breakpoint {} in state {:?}, expected {:?}", id, bp.state, from);
        }
        bp.state = to;
        Ok(bp)
    }

    /// 挿入コマンドを送信した
    ///
    /// 新しい挿入サイクルが始まるため、前回の応答は破棄します。
    pub fn notify_insert_proceeding(&mut self, id: BreakpointModelId) -> Result<(), ProtocolError> {
        let bp = self.transition(
            id,
            &[BreakpointState::InsertRequested],
            BreakpointState::InsertProceeding,
        )?;
        bp.response = None;
        Ok(())
    }

    /// ツールの応答を記録する（挿入サイクルごとに1回だけ）
    pub fn set_response(
        &mut self,
        id: BreakpointModelId,
        response: BreakpointResponse,
    ) -> Result<(), ProtocolError> {
        let bp = self
            .breakpoints
            .get_mut(&id)
            .ok_or(ProtocolError::UnknownBreakpoint(id))?;
        if let Some(existing) = &bp.response {
            warn!("Breakpoint {} already has response {:?}", id, existing);
            return Err(ProtocolError::UnexpectedReply {
                command: format!("break set ({})", bp.params.location),
                reply: format!("duplicate response for breakpoint {}", response.id),
            });
        }
        bp.response = Some(response);
        Ok(())
    }

    pub fn notify_insert_ok(&mut self, id: BreakpointModelId) -> Result<(), ProtocolError> {
        self.transition(
            id,
            &[BreakpointState::InsertProceeding],
            BreakpointState::Inserted,
        )
        .map(|_| ())
    }

    pub fn notify_insert_failed(&mut self, id: BreakpointModelId) -> Result<(), ProtocolError> {
        self.transition(
            id,
            &[BreakpointState::InsertProceeding],
            BreakpointState::InsertFailed,
        )
        .map(|_| ())
    }

    /// 削除を要求する
    ///
    /// まだツールに挿入されていないものはその場で取り除き、false を返します。
    pub fn request_removal(&mut self, id: BreakpointModelId) -> Result<bool, ProtocolError> {
        let bp = self
            .breakpoints
            .get_mut(&id)
            .ok_or(ProtocolError::UnknownBreakpoint(id))?;
        if bp.response.is_none() {
            self.breakpoints.remove(&id);
            return Ok(false);
        }
        bp.state = BreakpointState::RemoveRequested;
        Ok(true)
    }

    pub fn notify_remove_proceeding(&mut self, id: BreakpointModelId) -> Result<(), ProtocolError> {
        self.transition(
            id,
            &[BreakpointState::RemoveRequested],
            BreakpointState::RemoveProceeding,
        )
        .map(|_| ())
    }

    /// 削除が完了した（一覧から取り除く）
    pub fn notify_remove_ok(&mut self, id: BreakpointModelId) -> Result<(), ProtocolError> {
        self.breakpoints
            .remove(&id)
            .map(|_| ())
            .ok_or(ProtocolError::UnknownBreakpoint(id))
    }
}

impl Default for BreakHandler {
    fn default() -> Self {
        Self::new()
    }
}
