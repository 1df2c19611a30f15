use super::helper::{self, RecordingTransport};
use anyhow::Result;
use metalmq_channel::frame::{self, Confirmation};
use metalmq_channel::{Channel, ChannelConfig, ClientError, DeferredState, ErrorKind, FailurePolicy};

#[test]
fn commit_without_transaction_is_refused() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let err = helper::to_client_error(ch.commit_transaction());

    assert_eq!(err.kind, ErrorKind::Misuse);
    assert_eq!(err.class_method, frame::TX_COMMIT);

    let err = helper::to_client_error(ch.rollback_transaction());

    assert_eq!(err.class_method, frame::TX_ROLLBACK);
    assert!(transport.sent().is_empty());
}

#[test]
fn commit_after_select() -> Result<()> {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let selected = ch.start_transaction();

    assert!(ch.is_transactional());

    let committed = ch.commit_transaction()?;

    ch.on_confirmation(Confirmation::TxSelectOk);
    ch.on_confirmation(Confirmation::TxCommitOk);

    assert_eq!(selected.state(), DeferredState::Succeeded);
    assert_eq!(committed.state(), DeferredState::Succeeded);

    // The channel stays transactional after the commit.
    let rolled_back = ch.rollback_transaction()?;
    ch.on_confirmation(Confirmation::TxRollbackOk);

    assert_eq!(rolled_back.state(), DeferredState::Succeeded);
    assert_eq!(
        transport.class_methods(),
        vec![frame::TX_SELECT, frame::TX_COMMIT, frame::TX_ROLLBACK]
    );

    Ok(())
}

#[test]
fn select_while_opening_counts_as_transaction() -> Result<()> {
    let transport = RecordingTransport::new();
    let ch = Channel::open(1, transport.weak(), ChannelConfig::default());

    ch.start_transaction();

    let committed = ch.commit_transaction()?;

    ch.on_confirmation(Confirmation::ChannelOpenOk);

    assert_eq!(
        transport.class_methods(),
        vec![frame::CHANNEL_OPEN, frame::TX_SELECT, frame::TX_COMMIT]
    );
    assert!(committed.is_pending());

    Ok(())
}

#[test]
fn failed_select_clears_the_transaction() {
    let transport = RecordingTransport::new();
    let config = ChannelConfig {
        failure_policy: FailurePolicy::FailOperation,
        ..Default::default()
    };
    let ch = helper::open_channel(&transport, config);

    let selected = ch.start_transaction();

    ch.on_operation_error(ClientError::broker(1, 540, "NOT_IMPLEMENTED", frame::TX_SELECT));

    assert_eq!(selected.state(), DeferredState::Failed);
    assert!(!ch.is_transactional());
    assert!(ch.commit_transaction().is_err());
}
