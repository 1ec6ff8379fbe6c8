use gpctl_common::{GpError, ProgressEvent, Result, TickKind};
use gpctl_proto::HubReply;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tracing::{debug, info};

const BAR_TEMPLATE: &str = "{prefix:<24} [{bar:40}] {pos}/{len}";

/// Renders the MakeCluster event stream on the terminal.
///
/// Log events go through tracing, stdout chunks are written as they come,
/// and every progress label gets its own bar.
pub struct StreamRenderer {
    bars: MultiProgress,
    progress: HashMap<String, ProgressBar>,
    out: Box<dyn Write + Send>,
}

impl Default for StreamRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRenderer {
    pub fn new() -> Self {
        Self::with_target(MultiProgress::new(), Box::new(io::stdout()))
    }

    /// No bars drawn; stdout chunks go to `out`
    pub fn hidden(out: Box<dyn Write + Send>) -> Self {
        Self::with_target(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()), out)
    }

    fn with_target(bars: MultiProgress, out: Box<dyn Write + Send>) -> Self {
        Self {
            bars,
            progress: HashMap::new(),
            out,
        }
    }

    /// (done, total) for a progress label
    pub fn progress(&self, label: &str) -> Option<(u64, u64)> {
        self.progress
            .get(label)
            .map(|bar| (bar.position(), bar.length().unwrap_or(0)))
    }

    fn bar(&mut self, label: &str) -> &ProgressBar {
        let bars = &self.bars;
        self.progress.entry(label.to_string()).or_insert_with(|| {
            let bar = bars.add(ProgressBar::new(0));
            if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
                bar.set_style(style.progress_chars("=> "));
            }
            bar.set_prefix(label.to_string());
            bar
        })
    }

    pub fn handle(&mut self, event: ProgressEvent) -> Result<()> {
        match event {
            ProgressEvent::Log(message) => self.bars.suspend(|| info!("{}", message)),
            ProgressEvent::Stdout(chunk) => {
                let out = &mut self.out;
                self.bars
                    .suspend(|| out.write_all(chunk.as_bytes()).and_then(|_| out.flush()))?;
            }
            ProgressEvent::Progress(tick) => match tick.kind {
                TickKind::Init { total } => self.bar(&tick.label).set_length(u64::from(total)),
                TickKind::Increment => {
                    let bar = self.bar(&tick.label);
                    bar.inc(1);
                    if bar.length() == Some(bar.position()) {
                        bar.finish();
                    }
                }
            },
        }
        Ok(())
    }

    /// Drain `stream` until the hub closes it. A status received from the
    /// hub ends rendering and is returned as the error.
    pub async fn consume<S>(&mut self, mut stream: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<HubReply, Status>> + Unpin,
    {
        while let Some(item) = stream.next().await {
            match item {
                Ok(reply) => self.handle(ProgressEvent::try_from(reply)?)?,
                Err(status) => {
                    self.abandon();
                    return Err(GpError::remote("hub", status.message()));
                }
            }
        }

        debug!("MakeCluster stream closed");
        Ok(())
    }

    fn abandon(&self) {
        for bar in self.progress.values().filter(|bar| !bar.is_finished()) {
            bar.abandon();
        }
    }
}
