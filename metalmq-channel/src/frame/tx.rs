use super::MethodFrame;

pub fn tx_select() -> MethodFrame {
    MethodFrame::TxSelect
}

pub fn tx_commit() -> MethodFrame {
    MethodFrame::TxCommit
}

pub fn tx_rollback() -> MethodFrame {
    MethodFrame::TxRollback
}
