//! Per-test log capture.
//!
//! Tests run in parallel, so log output written straight to the console by a global subscriber is
//! an interleaved mess.  Instead each test gets its own subscriber and its own tokio runtime, and
//! the events it logs are printed together once the test is over.
use crate::Result;
use std::{
    cell::RefCell,
    future::Future,
    io::Write,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::fmt::MakeWriter;

/// Default filter when `RUST_LOG` isn't set.  The SDK and HTTP stack are too noisy at debug.
const DEFAULT_FILTER: &str = "h2=warn,hyper=info,rustls=info,aws=info,reqwest=info,debug";

/// Buffers formatted log events in memory
#[derive(Clone, Default)]
struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Take everything logged so far
    fn drain(&self) -> String {
        let buffer = std::mem::take(&mut *self.buffer.lock().unwrap());

        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Write for &CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// Run an async test with its log events captured.
///
/// Use this instead of `#[tokio::test]`.  It builds a multi-threaded tokio runtime whose worker
/// threads, and the blocking pool threads used by `spawn_blocking`, all log to this test's
/// subscriber.  The captured events are printed when the test finishes, including when it panics.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    let logs = CapturedLogs::default();

    let dispatch = {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{fmt, EnvFilter};

        let format = fmt::layer()
            .with_level(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(false)
            .with_writer(logs.clone());

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
            .unwrap();

        Arc::new(tracing::Dispatch::new(
            tracing_subscriber::registry().with(filter).with(format),
        ))
    };

    std::thread_local! {
        static THREAD_DISPATCH: RefCell<Option<tracing::subscriber::DefaultGuard>> = RefCell::new(None);
    }

    tracing::dispatcher::with_default(&dispatch, || {
        let runtime = {
            let dispatch = dispatch.clone();

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .on_thread_start(move || {
                    let guard = tracing::dispatcher::set_default(&dispatch);
                    THREAD_DISPATCH.with(|cell| cell.replace(Some(guard)));
                })
                .on_thread_stop(|| {
                    THREAD_DISPATCH.with(|cell| cell.replace(None));
                })
                .build()?
        };

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(Duration::from_secs(10));

            result
        }));

        println!("Log events from this test: \n{}", logs.drain());

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}
