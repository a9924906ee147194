use crate::parser::{is_header, parse_line};
use order_book::Order;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

pub type OrderCallback = Arc<dyn Fn(Order) + Send + Sync>;

const TICK_PACING: Duration = Duration::from_millis(10);

/// Replays a CSV tick file as a stream of orders on a background thread.
///
/// Malformed rows are skipped with a warning; a missing file is logged and
/// the feed simply produces nothing.
pub struct MarketDataFeed {
    file_path: String,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MarketDataFeed {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Spawns the reader thread; `callback` receives each parsed order.
    pub fn start(&mut self, callback: OrderCallback) {
        self.running.store(true, Ordering::SeqCst);
        let path = self.file_path.clone();
        let running = Arc::clone(&self.running);
        self.worker = Some(thread::spawn(move || {
            feed_loop(&path, &running, callback);
        }));
    }

    /// Signals the reader thread and joins it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MarketDataFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn feed_loop(path: &str, running: &AtomicBool, callback: OrderCallback) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            error!(path, error = %e, "failed to open market data file");
            running.store(false, Ordering::SeqCst);
            return;
        }
    };

    let mut lines = BufReader::new(file).lines().peekable();
    if let Some(Ok(first)) = lines.peek() {
        if is_header(first) {
            lines.next();
        }
    }

    for line in lines {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to read market data line");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        match parse_line(&line) {
            Ok(order) => {
                info!(
                    instrument = %order.instrument,
                    side = %order.side,
                    price = %order.price,
                    quantity = order.quantity,
                    timestamp = order.timestamp,
                    "tick parsed"
                );
                callback(order);
            }
            Err(e) => {
                warn!(line = %line, error = %e, "skipping malformed line");
                continue;
            }
        }

        thread::sleep(TICK_PACING);
    }

    running.store(false, Ordering::SeqCst);
    info!(path, "finished processing market data file");
}
