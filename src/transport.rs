//! JSON-lines transport over a byte stream pair.
//!
//! Each non-blank input line is handed to the worker untouched; each response
//! is written as one line. All decoding happens inside the worker.

use std::io::{BufRead, BufReader, Read, Write};
use std::thread;

use sheetcache_core::protocol::encode_response;
use sheetcache_core::worker::{WorkerHandle, WorkerSender};

use crate::error::Result;

/// Pump `input` into `worker` and its responses into `output` until the
/// input ends and every queued request has been answered.
///
/// Returns the number of responses written.
pub fn serve<R, W>(mut worker: WorkerHandle, input: R, mut output: W) -> Result<usize>
where
    R: Read + Send + 'static,
    W: Write,
{
    let sender = worker.sender()?;
    // From here on the reader thread holds the only way in; its EOF ends the worker.
    worker.close();

    let reader = thread::Builder::new()
        .name("sheetcache-stdin".to_string())
        .spawn(move || read_lines(input, sender))?;

    let mut written = 0;
    while let Some(response) = worker.recv() {
        let line = encode_response(&response)?;
        writeln!(output, "{}", line)?;
        output.flush()?;
        written += 1;
    }

    if reader.join().is_err() {
        log::error!("input reader thread panicked");
    }
    for response in worker.shutdown() {
        writeln!(output, "{}", encode_response(&response)?)?;
        written += 1;
    }
    output.flush()?;
    Ok(written)
}

fn read_lines<R: Read>(input: R, sender: WorkerSender) {
    let mut input = BufReader::new(input);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                log::error!("failed to read input: {}", err);
                break;
            }
        }
        // Invalid UTF-8 still reaches the worker, which answers it as malformed.
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if sender.post_raw(line).is_err() {
            log::debug!("worker stopped; no longer reading input");
            break;
        }
    }
    log::debug!("input closed");
}
