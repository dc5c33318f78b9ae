use std::io::{self, Write};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::filter::{LineFilter, LogFilter};
use crate::format::{JsonFormatter, LineFormatter, Painter, RawFormatter, SourcePrefixFormatter};
use kubetail_types::{Line, SourceIdentity, TailOptions};

/// Everything a session can send to the output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Line(Line),
    SourceAdded(SourceIdentity),
    SourceRemoved(SourceIdentity),
    SourceFailed {
        source: SourceIdentity,
        message: String,
    },
}

/// Sending side of the fan-in, one clone per session
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl SinkHandle {
    fn send(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            debug!("output closed, dropping event");
        }
    }

    pub fn line(&self, source: &SourceIdentity, text: String) {
        self.send(SinkEvent::Line(Line::new(source.clone(), text)));
    }

    pub fn added(&self, source: SourceIdentity) {
        self.send(SinkEvent::SourceAdded(source));
    }

    pub fn removed(&self, source: SourceIdentity) {
        self.send(SinkEvent::SourceRemoved(source));
    }

    pub fn failed(&self, source: &SourceIdentity, message: impl Into<String>) {
        self.send(SinkEvent::SourceFailed {
            source: source.clone(),
            message: message.into(),
        });
    }
}

/// Filter then formatter, applied to each line before it is written
pub struct OutputPipeline {
    filter: Box<dyn LineFilter>,
    formatter: Box<dyn LineFormatter>,
    painter: Painter,
}

impl OutputPipeline {
    pub fn new(
        filter: impl LineFilter + 'static,
        formatter: impl LineFormatter + 'static,
        painter: Painter,
    ) -> Self {
        Self {
            filter: Box::new(filter),
            formatter: Box::new(formatter),
            painter,
        }
    }

    /// No filtering, no formatting, no colour
    pub fn raw() -> Self {
        Self::new(LogFilter::new(), RawFormatter, Painter::plain())
    }

    /// Pipeline matching the raw, display-names, exclude and MDC options
    pub fn from_options(options: &TailOptions, filter: LogFilter, painter: Painter) -> Self {
        let filter = filter.with_excludes(&options.excludes);

        match (options.raw, options.display_names) {
            (true, false) => Self::new(filter, RawFormatter, painter),
            (true, true) => Self::new(filter, SourcePrefixFormatter::new(RawFormatter), painter),
            (false, display_names) => {
                let json = JsonFormatter::new(painter).with_mdcs(options.mdcs.clone());
                if display_names {
                    Self::new(filter, SourcePrefixFormatter::new(json), painter)
                } else {
                    Self::new(filter, json, painter)
                }
            }
        }
    }

    /// Text to write for `event`, or `None` when it is filtered out
    pub fn render(&self, event: &SinkEvent) -> Option<String> {
        match event {
            SinkEvent::Line(line) => {
                if !self.filter.accept(&line.text) {
                    return None;
                }
                Some(self.formatter.format(line))
            }
            SinkEvent::SourceAdded(source) => Some(self.painter.blue(&format!("+ {}", source))),
            SinkEvent::SourceRemoved(source) => Some(self.painter.red(&format!("- {}", source))),
            SinkEvent::SourceFailed { source, message } => {
                Some(self.painter.red(&format!("! {}: {}", source, message)))
            }
        }
    }
}

/// Single writer that every session funnels into
///
/// Events are written in arrival order and flushed one by one. Lines of one
/// source keep their order; lines of different sources interleave freely.
/// A failed write stops the sink and cancels the run it belongs to.
pub struct FanInSink<W> {
    rx: mpsc::UnboundedReceiver<SinkEvent>,
    writer: W,
    pipeline: OutputPipeline,
    cancel: CancellationToken,
}

impl<W: Write + Send + 'static> FanInSink<W> {
    pub fn new(writer: W, pipeline: OutputPipeline) -> (Self, SinkHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                writer,
                pipeline,
                cancel: CancellationToken::new(),
            },
            SinkHandle { tx },
        )
    }

    /// Cancel `cancel` when the output can no longer be written
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run on its own task; the writer is handed back once every
    /// [`SinkHandle`] is dropped
    pub fn spawn(self) -> JoinHandle<io::Result<W>> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> io::Result<W> {
        while let Some(event) = self.rx.recv().await {
            if let Err(e) = self.write_event(&event) {
                warn!(error = %e, "output failed, stopping");
                self.cancel.cancel();
                return Err(e);
            }
        }
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_event(&mut self, event: &SinkEvent) -> io::Result<()> {
        if let Some(text) = self.pipeline.render(event) {
            writeln!(self.writer, "{}", text)?;
            self.writer.flush()?;
        }
        Ok(())
    }
}
