use super::helper::{self, Journal, RecordingTransport};
use anyhow::Result;
use metalmq_channel::frame::{
    self, BasicAckFlags, BasicPublishFlags, BasicRejectFlags, ChannelFlowArgs, Confirmation, ExchangeBindArgs,
    ExchangeDeclareArgs, ExchangeDeleteFlags, MethodFrame, QueueBindArgs, QueueDeclareArgs, QueueDeclareOkArgs,
    QueueDeleteFlags, QueueDeleteOkArgs, QueuePurgeFlags, QueuePurgeOkArgs,
};
use metalmq_channel::{
    Channel, ChannelConfig, ClientError, DeferredState, ErrorKind, ExchangeType, FailurePolicy, Phase, QueueInfo,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[test]
fn confirmations_resolve_in_issue_order() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());
    let journal = Journal::default();

    for i in 0..5 {
        let j = journal.clone();

        ch.bind_queue(QueueBindArgs::new(&format!("q{}", i), "x"))
            .on_success(move |_| j.log(format!("bound {}", i)));
    }

    assert_eq!(transport.class_methods(), vec![frame::QUEUE_BIND; 5]);

    for _ in 0..5 {
        ch.on_confirmation(Confirmation::QueueBindOk);
    }

    assert_eq!(
        journal.entries(),
        vec!["bound 0", "bound 1", "bound 2", "bound 3", "bound 4"]
    );
    assert_eq!(ch.pending_operations(), 0);
}

#[test]
fn finalize_fires_once_whatever_the_registration_order() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());
    let journal = Journal::default();

    let (j1, j2) = (journal.clone(), journal.clone());
    ch.declare_exchange(ExchangeDeclareArgs::new("logs", ExchangeType::Topic))
        .on_finalize(move || j1.log("first finalized"))
        .on_success(move |_| j2.log("first succeeded"));

    let (j3, j4) = (journal.clone(), journal.clone());
    let second = ch.remove_exchange("logs", ExchangeDeleteFlags::default());
    second.on_error(move |err| j3.log(format!("second failed {}", err.code)));

    ch.on_confirmation(Confirmation::ExchangeDeclareOk);
    ch.on_channel_error(ClientError::broker(1, 406, "PRECONDITION_FAILED", frame::EXCHANGE_DELETE));

    second.on_finalize(move || j4.log("second finalized"));

    assert_eq!(
        journal.entries(),
        vec!["first succeeded", "first finalized", "second failed 406", "second finalized"]
    );
}

#[test]
fn queued_operation_on_closed_channel_fails_without_sending() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    helper::close_channel(&ch);
    transport.clear();

    let declared = ch.declare_queue(QueueDeclareArgs::default().name("orders"));

    assert_eq!(declared.state(), DeferredState::Failed);
    assert!(transport.sent().is_empty());

    let kind = Rc::new(Cell::new(None));
    let k = kind.clone();
    declared.on_error(move |err| k.set(Some(err.kind)));

    assert_eq!(kind.get(), Some(ErrorKind::ChannelNotUsable));
}

#[test]
fn no_wait_resolves_without_confirmation() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let waiting = ch.bind_queue(QueueBindArgs::new("orders", "x"));
    let immediate = ch.bind_queue(QueueBindArgs::new("orders", "y").no_wait(true));

    assert!(waiting.is_pending());
    assert_eq!(immediate.state(), DeferredState::Succeeded);
    assert_eq!(transport.class_methods(), vec![frame::QUEUE_BIND, frame::QUEUE_BIND]);

    // Only the first one waits for a confirmation.
    assert_eq!(ch.pending_operations(), 1);

    ch.on_confirmation(Confirmation::QueueBindOk);

    assert_eq!(waiting.state(), DeferredState::Succeeded);
}

#[test]
fn no_wait_payloads_are_defaults() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let info = Rc::new(RefCell::new(None));
    let i = info.clone();
    ch.declare_queue(QueueDeclareArgs::default().name("orders").no_wait(true))
        .on_success(move |q| *i.borrow_mut() = Some(q.clone()));

    let purged = Rc::new(Cell::new(None));
    let p = purged.clone();
    ch.purge_queue("orders", QueuePurgeFlags::NO_WAIT)
        .on_success(move |n| p.set(Some(*n)));

    assert_eq!(
        *info.borrow(),
        Some(QueueInfo {
            name: "orders".to_string(),
            message_count: 0,
            consumer_count: 0
        })
    );
    assert_eq!(purged.get(), Some(0));
}

#[test]
fn channel_error_fails_everything_pending() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());
    let journal = Journal::default();

    let j = journal.clone();
    ch.on_error(move |err| j.log(format!("channel error {}", err.code)));

    let deferreds = vec![
        ch.declare_exchange(ExchangeDeclareArgs::new("x", ExchangeType::Direct)),
        ch.bind_queue(QueueBindArgs::new("q", "x")),
        ch.set_qos(10),
    ];

    for (i, d) in deferreds.iter().enumerate() {
        let j = journal.clone();
        d.on_error(move |err| j.log(format!("op {} {:?}", i, err.kind)));
    }

    ch.on_channel_error(ClientError::broker(1, 404, "NOT_FOUND - no exchange 'x'", frame::EXCHANGE_DECLARE));

    assert_eq!(
        journal.entries(),
        vec!["channel error 404", "op 0 Broker", "op 1 Broker", "op 2 Broker"]
    );
    assert_eq!(ch.pending_operations(), 0);
    assert_eq!(ch.phase(), Phase::Closed);
    assert_eq!(transport.sent().last(), Some(&MethodFrame::ChannelCloseOk));

    // Late confirmation is a no-op.
    ch.on_confirmation(Confirmation::ExchangeDeclareOk);

    assert_eq!(journal.entries().len(), 4);
    assert_eq!(ch.close_reason().map(|e| e.code), Some(404));
}

#[test]
fn declare_queue_gets_name_and_counts() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let info = Rc::new(RefCell::new(None));
    let i = info.clone();
    ch.declare_queue(QueueDeclareArgs::default().name("orders"))
        .on_success(move |q| *i.borrow_mut() = Some(q.clone()));

    ch.on_confirmation(Confirmation::QueueDeclareOk(QueueDeclareOkArgs::default().name("orders-1")));

    assert_eq!(
        *info.borrow(),
        Some(QueueInfo {
            name: "orders-1".to_string(),
            message_count: 0,
            consumer_count: 0
        })
    );
}

#[test]
fn remove_queue_gets_message_count() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let removed = Rc::new(Cell::new(None));
    let r = removed.clone();
    ch.remove_queue("orders", QueueDeleteFlags::IF_UNUSED)
        .on_success(move |n| r.set(Some(*n)));

    ch.on_confirmation(Confirmation::QueueDeleteOk(QueueDeleteOkArgs::default().message_count(12)));

    assert_eq!(removed.get(), Some(12));

    let purged = ch.purge_queue("orders", QueuePurgeFlags::default());
    ch.on_confirmation(Confirmation::QueuePurgeOk(QueuePurgeOkArgs::default().message_count(3)));

    assert_eq!(purged.state(), DeferredState::Succeeded);
}

#[test]
fn publish_on_closed_channel_returns_false() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    assert!(ch.publish("", "orders", "first", BasicPublishFlags::default()));

    helper::close_channel(&ch);
    transport.clear();

    assert!(!ch.publish("", "orders", "second", BasicPublishFlags::MANDATORY));
    assert!(transport.sent().is_empty());
}

#[test]
fn publish_fails_when_transport_is_not_writable() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    transport.writable.set(false);

    assert!(!ch.publish("", "orders", "body", BasicPublishFlags::default()));

    let declared = ch.declare_exchange(ExchangeDeclareArgs::new("x", ExchangeType::Fanout));

    assert_eq!(declared.state(), DeferredState::Failed);
    assert_eq!(ch.pending_operations(), 0);
    // A single send failure doesn't close the channel.
    assert!(ch.connected());
}

#[test]
fn operations_while_opening_are_sent_once_open() {
    let transport = RecordingTransport::new();
    let ch = Channel::open(3, transport.weak(), ChannelConfig::default());
    let journal = Journal::default();

    let j = journal.clone();
    ch.on_ready(move || j.log("ready"));

    let j = journal.clone();
    ch.declare_exchange(ExchangeDeclareArgs::new("x", ExchangeType::Headers))
        .on_success(move |_| j.log("declared"));
    ch.bind_exchange(ExchangeBindArgs::new("x", "y"));

    assert!(!ch.connected());
    assert!(!ch.publish("x", "", "too early", BasicPublishFlags::default()));
    assert_eq!(transport.sent_to(3), vec![frame::CHANNEL_OPEN]);

    ch.on_confirmation(Confirmation::ChannelOpenOk);

    assert!(ch.connected());
    assert_eq!(
        transport.sent_to(3),
        vec![frame::CHANNEL_OPEN, frame::EXCHANGE_DECLARE, frame::EXCHANGE_BIND]
    );

    ch.on_confirmation(Confirmation::ExchangeDeclareOk);
    ch.on_confirmation(Confirmation::ExchangeBindOk);

    assert_eq!(journal.entries(), vec!["ready", "declared"]);
}

#[test]
fn on_ready_after_open_runs_immediately() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());
    let ready = Rc::new(Cell::new(0));

    let r = ready.clone();
    ch.on_ready(move || r.set(r.get() + 1));

    assert_eq!(ready.get(), 1);
}

#[test]
fn mismatching_confirmation_closes_the_channel() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let declared = ch.declare_queue(QueueDeclareArgs::default().name("orders"));
    let bound = ch.bind_queue(QueueBindArgs::new("orders", "x"));

    ch.on_confirmation(Confirmation::QueueBindOk);

    assert_eq!(declared.state(), DeferredState::Failed);
    assert_eq!(bound.state(), DeferredState::Failed);
    assert_eq!(ch.phase(), Phase::Closed);

    let reason = ch.close_reason().unwrap();

    assert_eq!(reason.kind, ErrorKind::ProtocolMismatch);
    assert_eq!(reason.code, 505);

    match transport.sent().last() {
        Some(MethodFrame::ChannelClose(args)) => assert_eq!(args.code, 505),
        other => panic!("{other:?} is not a channel close"),
    }
}

#[test]
fn operations_after_close_request_are_refused() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let declared = ch.declare_exchange(ExchangeDeclareArgs::new("x", ExchangeType::Direct));
    let closed = ch.close();
    let late = ch.set_qos(1);

    assert_eq!(late.state(), DeferredState::Failed);
    assert_eq!(ch.phase(), Phase::Closing);

    ch.on_confirmation(Confirmation::ExchangeDeclareOk);
    ch.on_confirmation(Confirmation::ChannelCloseOk);

    assert_eq!(declared.state(), DeferredState::Succeeded);
    assert_eq!(closed.state(), DeferredState::Succeeded);
    assert_eq!(ch.phase(), Phase::Closed);
    assert!(ch.close_reason().is_none());
}

#[test]
fn close_while_opening_is_sent_after_the_parked_operations() {
    let transport = RecordingTransport::new();
    let ch = Channel::open(1, transport.weak(), ChannelConfig::default());

    let declared = ch.declare_exchange(ExchangeDeclareArgs::new("x", ExchangeType::Direct));
    let closed = ch.close();

    ch.on_confirmation(Confirmation::ChannelOpenOk);

    assert_eq!(
        transport.class_methods(),
        vec![frame::CHANNEL_OPEN, frame::EXCHANGE_DECLARE, frame::CHANNEL_CLOSE]
    );

    ch.on_confirmation(Confirmation::ExchangeDeclareOk);
    ch.on_confirmation(Confirmation::ChannelCloseOk);

    assert_eq!(declared.state(), DeferredState::Succeeded);
    assert_eq!(closed.state(), DeferredState::Succeeded);
}

#[test]
fn fail_operation_policy_keeps_the_channel_open() {
    let transport = RecordingTransport::new();
    let config = ChannelConfig {
        failure_policy: FailurePolicy::FailOperation,
        ..Default::default()
    };
    let ch = helper::open_channel(&transport, config);

    let missing = ch.declare_queue(QueueDeclareArgs::default().name("missing").passive(true));
    let bound = ch.bind_queue(QueueBindArgs::new("orders", "x"));

    ch.on_operation_error(ClientError::broker(1, 404, "NOT_FOUND", frame::QUEUE_DECLARE));

    assert_eq!(missing.state(), DeferredState::Failed);
    assert!(bound.is_pending());
    assert!(ch.connected());

    ch.on_confirmation(Confirmation::QueueBindOk);

    assert_eq!(bound.state(), DeferredState::Succeeded);
}

#[test]
fn close_channel_policy_closes_on_operation_error() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let missing = ch.declare_queue(QueueDeclareArgs::default().name("missing").passive(true));
    let bound = ch.bind_queue(QueueBindArgs::new("orders", "x"));

    ch.on_operation_error(ClientError::broker(1, 404, "NOT_FOUND", frame::QUEUE_DECLARE));

    assert_eq!(missing.state(), DeferredState::Failed);
    assert_eq!(bound.state(), DeferredState::Failed);
    assert_eq!(ch.phase(), Phase::Closed);
}

#[test]
fn error_callback_registered_after_close_runs_immediately() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    ch.on_channel_error(ClientError::broker(1, 403, "ACCESS_REFUSED", frame::QUEUE_DECLARE));

    let code = Rc::new(Cell::new(0));
    let c = code.clone();
    ch.on_error(move |err| c.set(err.code));

    assert_eq!(code.get(), 403);
}

#[test]
fn reactions_can_issue_new_operations() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let inner = ch.clone();
    ch.declare_queue(QueueDeclareArgs::default()).on_success(move |q| {
        inner.bind_queue(QueueBindArgs::new(&q.name, "amq.direct").routing_key("rk"));
    });

    ch.on_confirmation(Confirmation::QueueDeclareOk(QueueDeclareOkArgs::default().name("amq.gen-1")));

    match transport.sent().last() {
        Some(MethodFrame::QueueBind(args)) => assert_eq!(args.queue_name, "amq.gen-1"),
        other => panic!("{other:?} is not a queue bind"),
    }
}

#[test]
fn pause_and_resume_follow_flow_ok() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    ch.pause();
    ch.on_confirmation(Confirmation::ChannelFlowOk(ChannelFlowArgs::default().active(false)));

    assert!(ch.is_paused());

    ch.resume();
    ch.on_confirmation(Confirmation::ChannelFlowOk(ChannelFlowArgs::default().active(true)));

    assert!(!ch.is_paused());
}

#[test]
fn too_long_name_is_refused_locally() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let declared = ch.declare_queue(QueueDeclareArgs::default().name(&"q".repeat(256)));

    assert_eq!(declared.state(), DeferredState::Failed);
    assert!(transport.sent().is_empty());
}

#[test]
fn reject_multiple_is_sent_as_nack() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    assert!(ch.reject(5, BasicRejectFlags::MULTIPLE | BasicRejectFlags::REQUEUE));
    assert!(ch.reject(6, BasicRejectFlags::default()));
    assert!(ch.ack(7, BasicAckFlags::MULTIPLE));

    assert_eq!(
        transport.class_methods(),
        vec![frame::BASIC_NACK, frame::BASIC_REJECT, frame::BASIC_ACK]
    );

    match &transport.sent()[0] {
        MethodFrame::BasicNack(args) => assert!(args.multiple && args.requeue),
        other => panic!("{other:?} is not a nack"),
    }
}

#[tokio::test]
async fn deferred_can_be_awaited() -> Result<()> {
    let local = tokio::task::LocalSet::new();

    local
        .run_until(async {
            let transport = RecordingTransport::new();
            let ch = helper::open_channel(&transport, ChannelConfig::default());

            let declared = ch.declare_queue(QueueDeclareArgs::default().exclusive(true));

            let broker = ch.clone();
            tokio::task::spawn_local(async move {
                tokio::task::yield_now().await;

                broker.on_confirmation(Confirmation::QueueDeclareOk(
                    QueueDeclareOkArgs::default().name("amq.gen-42").consumer_count(1),
                ));
            });

            let info = declared.await?;

            assert_eq!(info.name, "amq.gen-42");
            assert_eq!(info.consumer_count, 1);

            Ok::<(), anyhow::Error>(())
        })
        .await
}

#[tokio::test]
async fn unconfirmed_deferred_times_out() {
    let transport = RecordingTransport::new();
    let ch = helper::open_channel(&transport, ChannelConfig::default());

    let declared = ch.declare_exchange(ExchangeDeclareArgs::new("slow", ExchangeType::Direct));

    let result = tokio::time::timeout(Duration::from_millis(20), declared.clone()).await;

    assert!(result.is_err());
    assert!(declared.is_pending());
}

#[test]
fn ready_fails_when_open_cannot_be_sent() {
    let transport = RecordingTransport::new();
    transport.writable.set(false);

    let ch = Channel::open(1, transport.weak(), ChannelConfig::default());
    let ready = ch.ready();

    assert_eq!(ready.state(), DeferredState::Failed);
    assert_eq!(ch.phase(), Phase::Closed);

    let kind = Rc::new(Cell::new(None));
    let k = kind.clone();
    ready.on_error(move |err| k.set(Some(err.kind)));

    assert_eq!(kind.get(), Some(ErrorKind::LocalDispatch));
    assert_eq!(ch.declare_queue(QueueDeclareArgs::default()).state(), DeferredState::Failed);
}

#[test]
fn ready_fails_when_channel_is_lost_while_opening() {
    let lose: [fn(&Channel); 3] = [
        |ch| ch.on_channel_error(ClientError::broker(1, 403, "ACCESS_REFUSED", frame::CHANNEL_OPEN)),
        |ch| {
            ch.on_connection_lost(ClientError::new(
                ErrorKind::ConnectionLost,
                None,
                320,
                "CONNECTION_FORCED",
                frame::CHANNEL_OPEN,
            ))
        },
        |ch| ch.on_confirmation(Confirmation::TxSelectOk),
    ];

    for close in lose {
        let transport = RecordingTransport::new();
        let ch = Channel::open(1, transport.weak(), ChannelConfig::default());
        let parked = ch.set_qos(5);

        close(&ch);

        assert_eq!(ch.ready().state(), DeferredState::Failed);
        assert_eq!(parked.state(), DeferredState::Failed);
        assert_eq!(ch.pending_operations(), 0);
    }
}

#[tokio::test]
async fn every_task_waiting_for_ready_is_woken() -> Result<()> {
    let local = tokio::task::LocalSet::new();

    local
        .run_until(async {
            let transport = RecordingTransport::new();
            let ch = Channel::open(1, transport.weak(), ChannelConfig::default());

            let first = tokio::task::spawn_local(ch.ready());
            let second = tokio::task::spawn_local(ch.ready());

            // Lets both tasks poll the deferred before the broker answers.
            tokio::task::yield_now().await;

            ch.on_confirmation(Confirmation::ChannelOpenOk);

            let waited = tokio::time::timeout(Duration::from_millis(100), async {
                (first.await, second.await)
            })
            .await?;

            assert!(matches!(waited, (Ok(Ok(())), Ok(Ok(())))));

            Ok::<(), anyhow::Error>(())
        })
        .await
}
