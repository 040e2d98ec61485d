//! Components and fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::bundle::{Bundle, Constructor};
use crate::component::{Cache, Processor, RateLimit};
use crate::docs::{Category, ComponentSpec, FieldSpec};
use crate::error::{Error, ErrorKind, Result};
use crate::input::{Reader, ReaderInput};
use crate::mapping;
use crate::message::{Message, Part};
use crate::output::{default_max_in_flight, Writer, WriterOutput};
use crate::transaction::Response;

type Delay = Arc<dyn Fn(usize) -> Duration + Send + Sync>;

/// Records every payload it writes, optionally taking its time about it.
pub(crate) struct MemoryWriter {
    written: Arc<Mutex<Vec<String>>>,
    delay: Option<Delay>,
    writes: AtomicUsize,
}

impl MemoryWriter {
    pub(crate) fn new() -> Self {
        Self::with_sink(Arc::default())
    }

    pub(crate) fn with_sink(written: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            written,
            delay: None,
            writes: AtomicUsize::new(0),
        }
    }

    /// Write `i` takes `delay(i)`.
    pub(crate) fn with_delay(delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            delay: Some(Arc::new(delay)),
            ..Self::new()
        }
    }

    pub(crate) fn written(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.written)
    }
}

#[async_trait]
impl Writer for MemoryWriter {
    async fn write(&self, msg: &Message) -> Result<()> {
        let i = self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(i)).await;
        }
        let mut written = self.written.lock().unwrap();
        for part in msg {
            written.push(String::from_utf8_lossy(part.payload()).into_owned());
        }
        Ok(())
    }
}

/// Blocks every write until a permit is added to its gate.
pub(crate) struct GatedWriter {
    started: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
}

impl GatedWriter {
    pub(crate) fn new() -> Self {
        Self {
            started: Arc::default(),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub(crate) fn started(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.started)
    }

    pub(crate) fn gate(&self) -> Arc<Semaphore> {
        Arc::clone(&self.gate)
    }
}

#[async_trait]
impl Writer for GatedWriter {
    async fn write(&self, _msg: &Message) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.unwrap().forget();
        Ok(())
    }
}

/// Reads one single-part batch per payload, then reports exhaustion.
pub(crate) struct VecReader {
    pending: Mutex<VecDeque<Message>>,
    acks: Arc<Mutex<Vec<Response>>>,
}

impl VecReader {
    pub(crate) fn new<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        Self::with_acks(payloads, Arc::default())
    }

    pub(crate) fn with_acks<I, P>(payloads: I, acks: Arc<Mutex<Vec<Response>>>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        Self {
            pending: Mutex::new(
                payloads
                    .into_iter()
                    .map(|p| Message::new(vec![Part::new(p)]))
                    .collect(),
            ),
            acks,
        }
    }

    pub(crate) fn acks(&self) -> Arc<Mutex<Vec<Response>>> {
        Arc::clone(&self.acks)
    }
}

#[async_trait]
impl Reader for VecReader {
    async fn read(&self) -> Result<Option<Message>> {
        Ok(self.pending.lock().unwrap().pop_front())
    }

    async fn ack(&self, response: &Response) -> Result<()> {
        self.acks.lock().unwrap().push(response.clone());
        Ok(())
    }
}

/// Produces a numbered batch every millisecond, forever.
pub(crate) struct Ticker {
    next: AtomicUsize,
    acks: Arc<Mutex<Vec<Response>>>,
}

#[async_trait]
impl Reader for Ticker {
    async fn read(&self) -> Result<Option<Message>> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Message::from_payloads([n.to_string()])))
    }

    async fn ack(&self, response: &Response) -> Result<()> {
        self.acks.lock().unwrap().push(response.clone());
        Ok(())
    }
}

/// Sets one metadata entry on every part.
pub(crate) struct SetMeta {
    key: String,
    value: String,
}

impl SetMeta {
    pub(crate) fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl Processor for SetMeta {
    async fn process(&self, msg: &Message) -> Result<Vec<Message>> {
        let mut out = msg.clone();
        for part in out.iter_mut() {
            part.meta_set(&self.key, &self.value);
        }
        Ok(vec![out])
    }
}

pub(crate) struct DropAll;

#[async_trait]
impl Processor for DropAll {
    async fn process(&self, _msg: &Message) -> Result<Vec<Message>> {
        Ok(vec![Message::default()])
    }
}

pub(crate) struct FailAll;

#[async_trait]
impl Processor for FailAll {
    async fn process(&self, _msg: &Message) -> Result<Vec<Message>> {
        Err(Error::ProcessorError(ErrorKind::DeliveryError(
            "always fails".to_string(),
        )))
    }
}

/// Splits a batch into one batch per part.
pub(crate) struct SplitParts;

#[async_trait]
impl Processor for SplitParts {
    async fn process(&self, msg: &Message) -> Result<Vec<Message>> {
        Ok(msg.iter().map(|p| Message::new(vec![p.clone()])).collect())
    }
}

/// Stamps its configured `y` onto every part as metadata.
pub(crate) struct Capture {
    y: i64,
}

#[async_trait]
impl Processor for Capture {
    async fn process(&self, msg: &Message) -> Result<Vec<Message>> {
        let mut out = msg.clone();
        for part in out.iter_mut() {
            part.meta_set("y", self.y.to_string());
        }
        Ok(vec![out])
    }
}

#[derive(Default)]
pub(crate) struct MemoryCache {
    items: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.items.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.items.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.items.lock().unwrap().remove(key);
        Ok(())
    }
}

pub(crate) struct Unlimited;

#[async_trait]
impl RateLimit for Unlimited {
    async fn access(&self) -> Result<Duration> {
        Ok(Duration::ZERO)
    }
}

/// What the components of [`test_bundle`] observed.
#[derive(Default, Clone)]
pub(crate) struct Fixtures {
    /// Payloads written by `memory` outputs.
    pub(crate) written: Arc<Mutex<Vec<String>>>,
    /// Responses seen by `vec_reader` and `ticker` inputs.
    pub(crate) acks: Arc<Mutex<Vec<Response>>>,
    /// The `y` of every `capture` processor built.
    pub(crate) captured: Arc<Mutex<Vec<i64>>>,
}

#[derive(Deserialize)]
struct SetMetaConfig {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CaptureConfig {
    y: i64,
}

#[derive(Deserialize)]
struct VecReaderConfig {
    payloads: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryOutputConfig {
    #[serde(default = "default_max_in_flight")]
    max_in_flight: usize,
}

fn processor(name: &str) -> ComponentSpec {
    ComponentSpec::new(name, Category::Processor)
}

/// A bundle of test components wired to shared fixtures.
pub(crate) fn test_bundle() -> (Bundle, Fixtures) {
    let fixtures = Fixtures::default();
    let mut bundle = Bundle::new();

    bundle
        .add(
            processor("set_meta")
                .with_field(FieldSpec::new("key", "metadata key"))
                .with_field(FieldSpec::new("value", "metadata value")),
            Constructor::processor(|conf, _mgr| {
                let conf: SetMetaConfig = conf.decode()?;
                Ok(Box::new(SetMeta::new(conf.key, conf.value)))
            }),
        )
        .unwrap();
    bundle
        .add(
            processor("drop_all"),
            Constructor::processor(|_, _| Ok(Box::new(DropAll))),
        )
        .unwrap();
    bundle
        .add(
            processor("fail"),
            Constructor::processor(|_, _| Ok(Box::new(FailAll))),
        )
        .unwrap();
    bundle
        .add(
            processor("split"),
            Constructor::processor(|_, _| Ok(Box::new(SplitParts))),
        )
        .unwrap();

    let captured = Arc::clone(&fixtures.captured);
    bundle
        .add(
            processor("capture").with_field(FieldSpec::new("y", "stamped onto parts")),
            Constructor::processor(move |conf, _mgr| {
                let conf: CaptureConfig = conf.decode()?;
                captured.lock().unwrap().push(conf.y);
                Ok(Box::new(Capture { y: conf.y }))
            }),
        )
        .unwrap();
    mapping::register(&mut bundle).unwrap();

    let acks = Arc::clone(&fixtures.acks);
    bundle
        .add(
            ComponentSpec::new("vec_reader", Category::Input),
            Constructor::input(move |conf, mgr| {
                let conf: VecReaderConfig = conf.decode()?;
                let reader = VecReader::with_acks(conf.payloads, Arc::clone(&acks));
                Ok(Box::new(ReaderInput::new(mgr.label(), reader)?))
            }),
        )
        .unwrap();
    let acks = Arc::clone(&fixtures.acks);
    bundle
        .add(
            ComponentSpec::new("ticker", Category::Input),
            Constructor::input(move |_conf, mgr| {
                let reader = Ticker {
                    next: AtomicUsize::new(0),
                    acks: Arc::clone(&acks),
                };
                Ok(Box::new(ReaderInput::new(mgr.label(), reader)?))
            }),
        )
        .unwrap();

    let written = Arc::clone(&fixtures.written);
    bundle
        .add(
            ComponentSpec::new("memory", Category::Output),
            Constructor::output(move |conf, mgr| {
                let conf: MemoryOutputConfig = conf.decode()?;
                let writer = MemoryWriter::with_sink(Arc::clone(&written));
                Ok(Box::new(WriterOutput::new(
                    mgr.label(),
                    writer,
                    conf.max_in_flight,
                )?))
            }),
        )
        .unwrap();

    bundle
        .add(
            ComponentSpec::new("memory", Category::Cache),
            Constructor::cache(|_, _| Ok(Arc::new(MemoryCache::default()))),
        )
        .unwrap();
    bundle
        .add(
            ComponentSpec::new("unlimited", Category::RateLimit),
            Constructor::rate_limit(|_, _| Ok(Arc::new(Unlimited))),
        )
        .unwrap();

    (bundle, fixtures)
}
