//! Operator confirmation for the replug step.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorSignal {
    Confirmed,
    Cancelled,
}

/// Ask the operator to replug the receivers and wait, without timeout,
/// for Enter (confirm), `q` or Ctrl-C (cancel).
pub async fn await_reconnect(written: &[(u32, String)]) -> OperatorSignal {
    println!();
    println!("New serials were written to {} receiver(s):", written.len());
    for (index, serial) in written {
        println!("  bus {index} -> {serial}");
    }
    println!("Unplug every receiver, plug them back in, then press Enter (q to cancel).");

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        signal = read_answer(stdin) => signal,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT while waiting for reconnect");
            OperatorSignal::Cancelled
        }
    }
}

async fn read_answer<R: AsyncBufRead + Unpin>(input: R) -> OperatorSignal {
    let mut lines = input.lines();
    match lines.next_line().await {
        Ok(Some(line)) if matches!(line.trim(), "q" | "Q" | "quit") => OperatorSignal::Cancelled,
        Ok(Some(_)) => OperatorSignal::Confirmed,
        Ok(None) => {
            tracing::warn!("stdin closed while waiting for reconnect");
            OperatorSignal::Cancelled
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to read operator input");
            OperatorSignal::Cancelled
        }
    }
}
