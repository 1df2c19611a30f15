mod broker;

use anyhow::Result;
use broker::{Reply, ScriptedBroker};
use clap::{Parser, ValueEnum};
use log::{error, info};
use metalmq_channel::frame::{
    BasicAckFlags, BasicCancelFlags, BasicConsumeArgs, BasicPublishFlags, Envelope, ExchangeDeclareArgs,
    ExchangeDeleteFlags, MethodFrame, QueueBindArgs, QueueDeclareArgs, QueueDeleteFlags, QueuePurgeFlags,
};
use metalmq_channel::{
    parse_config, Channel, ChannelConfig, ChannelNumber, ChannelTable, ClientError, ExchangeType, Transmit,
};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::sync::mpsc;
use tokio::task::LocalSet;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scenario {
    Topology,
    Consume,
    Transaction,
    Failure,
}

/// Drives a channel against an in-process broker.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Channel config file (toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Scenario::Topology)]
    scenario: Scenario,
}

/// Hands the frames over to the broker task.
struct MpscTransport {
    frames: mpsc::UnboundedSender<(ChannelNumber, MethodFrame)>,
}

impl Transmit for MpscTransport {
    fn transmit(&self, channel: ChannelNumber, frame: MethodFrame) -> bool {
        self.frames.send((channel, frame)).is_ok()
    }
}

type Table = Rc<RefCell<ChannelTable>>;

async fn run_broker(table: Table, mut frames: mpsc::UnboundedReceiver<(ChannelNumber, MethodFrame)>) {
    let mut broker = ScriptedBroker::default();

    while let Some((channel, frame)) = frames.recv().await {
        for reply in broker.answer(channel, frame) {
            let table = table.borrow();

            match reply {
                Reply::Confirm(confirmation) => table.deliver_confirmation(channel, confirmation),
                Reply::Deliver {
                    consumer_tag,
                    delivery_tag,
                } => {
                    info!("Deliver {} to {}", delivery_tag, consumer_tag);

                    table.deliver_delivery(channel, &consumer_tag, delivery_tag);
                }
                Reply::Close(err) => table.deliver_channel_error(channel, err),
            }
        }
    }
}

async fn topology(ch: &Channel) -> Result<()> {
    ch.declare_exchange(ExchangeDeclareArgs::new("prices", ExchangeType::Direct).durable(true))
        .await?;

    let queue = ch.declare_queue(QueueDeclareArgs::default().exclusive(true)).await?;

    info!("Server generated queue {}", queue.name);

    ch.bind_queue(QueueBindArgs::new(&queue.name, "prices").routing_key("eur")).await?;

    for price in ["1.07", "1.08", "1.06"] {
        ch.publish("prices", "eur", Envelope::new(price.to_string()).content_type("text/plain"), BasicPublishFlags::default());
    }

    let purged = ch.purge_queue(&queue.name, QueuePurgeFlags::default()).await?;

    info!("Purged {} messages", purged);

    ch.remove_queue(&queue.name, QueueDeleteFlags::default()).await?;
    ch.remove_exchange("prices", ExchangeDeleteFlags::default()).await?;

    Ok(())
}

async fn consume(ch: &Channel) -> Result<()> {
    ch.declare_queue(QueueDeclareArgs::default().name("orders")).await?;
    ch.set_qos(10).await?;

    ch.publish("", "orders", "order-1", BasicPublishFlags::default());
    ch.publish("", "orders", "order-2", BasicPublishFlags::default());

    let consumer_tag = ch.consume(BasicConsumeArgs::default().queue("orders")).await?;

    info!("Consuming with {}", consumer_tag);

    ch.publish("", "orders", "order-3", BasicPublishFlags::default());

    // Let the broker deliver.
    tokio::task::yield_now().await;

    let outstanding = ch.outstanding_deliveries();

    info!("Outstanding deliveries {:?}", outstanding);

    if let Some(last) = outstanding.last() {
        ch.ack(*last, BasicAckFlags::MULTIPLE);
    }

    let cancelled = ch.cancel(&consumer_tag, BasicCancelFlags::default()).await?;

    info!("Consumer {} is cancelled, active consumers {:?}", cancelled, ch.consumer_tags());

    Ok(())
}

async fn transaction(ch: &Channel) -> Result<()> {
    if let Err(e) = ch.commit_transaction() {
        info!("Commit outside of transaction is refused: {}", e);
    }

    ch.start_transaction().await?;

    ch.publish("", "audit", "entry-1", BasicPublishFlags::default());
    ch.commit_transaction()?.await?;

    ch.publish("", "audit", "entry-2", BasicPublishFlags::default());
    ch.rollback_transaction()?.await?;

    info!("Channel is transactional: {}", ch.is_transactional());

    Ok(())
}

async fn failure(ch: &Channel) -> Result<()> {
    ch.on_error(|err| error!("Channel is closed by the broker {}", err));

    let missing = ch.declare_queue(QueueDeclareArgs::default().name("missing").passive(true));
    let bound = ch.bind_queue(QueueBindArgs::new("missing", "amq.direct"));

    bound
        .on_error(|err| info!("Bind failed as well: {:?} {}", err.kind, err.message))
        .on_finalize(|| info!("Bind is finalized"));

    match missing.await {
        Ok(queue) => info!("Unexpected queue {:?}", queue),
        Err(err) => info!("Declare failed {} {}", err.code, err.message),
    }

    let refused = ch.set_qos(1).await;

    info!("Operation on closed channel: {:?}", refused.map_err(|e: ClientError| e.kind));

    Ok(())
}

async fn run(cli: Cli, config: ChannelConfig) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport: Rc<dyn Transmit> = Rc::new(MpscTransport { frames: tx });
    let table: Table = Rc::new(RefCell::new(ChannelTable::new(Rc::downgrade(&transport), config)));

    tokio::task::spawn_local(run_broker(table.clone(), rx));

    let ch = table.borrow_mut().open_channel()?;

    ch.on_ready(|| info!("Channel is ready"));
    ch.ready().await?;

    match cli.scenario {
        Scenario::Topology => topology(&ch).await?,
        Scenario::Consume => consume(&ch).await?,
        Scenario::Transaction => transaction(&ch).await?,
        Scenario::Failure => failure(&ch).await?,
    }

    if ch.connected() {
        ch.close().await?;
    }

    info!("Channel {} finished in {:?} phase", ch.id(), ch.phase());

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    metalmq_channel::setup_logger();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => parse_config(path)?,
        None => ChannelConfig::default(),
    };

    info!("Running {:?} with {:?}", cli.scenario, config);

    LocalSet::new().run_until(run(cli, config)).await
}
