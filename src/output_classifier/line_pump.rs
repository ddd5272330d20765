use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

use super::rules::OutputStream;

/// One line of subprocess output, tagged with its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Reads `reader` line by line and forwards each line to `tx`.
///
/// Invalid UTF-8 is replaced rather than treated as an error. The task ends
/// at EOF, on a read error, or once the receiver is gone; the
/// sender is dropped then, so a receiver fed by both pumps of a process sees
/// the channel close after both pipes closed.
pub fn spawn_line_pump<R>(
    reader: R,
    stream: OutputStream,
    tx: Sender<OutputLine>,
    label: String,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("[{}] {} read failed: {}", label, stream, e);
                    break;
                }
            }
            // Tool output is not guaranteed to be UTF-8; a bad byte must not
            // end the pump, or the tool dies of SIGPIPE on its next write.
            let text = String::from_utf8_lossy(trim_line_end(&buf)).into_owned();
            debug!("[{}][{}] {}", label, stream, text);
            if tx.send(OutputLine { stream, text }).await.is_err() {
                break;
            }
        }
        debug!("[{}] {} monitoring ended", label, stream);
    })
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn lines_are_forwarded_in_order_with_stream_tag() {
        let stdout = Builder::new()
            .read(b"Forwarding from 127.0.0.1:8080 -> 80\nHandling ")
            .read(b"connection for 8080\n")
            .build();
        let (tx, mut rx) = mpsc::channel(8);

        spawn_line_pump(stdout, OutputStream::Stdout, tx, "test".to_string())
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stream, OutputStream::Stdout);
        assert_eq!(first.text, "Forwarding from 127.0.0.1:8080 -> 80");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.text, "Handling connection for 8080");
        // The pump dropped its sender at EOF.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn channel_closes_only_after_both_pumps_finish() {
        let stdout = Builder::new().read(b"out\n").build();
        let stderr = Builder::new().read(b"err-1\nerr-2\n").build();
        let (tx, mut rx) = mpsc::channel(8);

        let a = spawn_line_pump(stdout, OutputStream::Stdout, tx.clone(), "t".to_string());
        let b = spawn_line_pump(stderr, OutputStream::Stderr, tx, "t".to_string());

        let mut received = Vec::new();
        while let Some(line) = rx.recv().await {
            received.push(line);
        }
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(received.len(), 3);
        let stderr_lines: Vec<_> = received
            .iter()
            .filter(|l| l.stream == OutputStream::Stderr)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(stderr_lines, vec!["err-1", "err-2"]);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_stop_the_pump() {
        let stderr = Builder::new()
            .read(b"\xff\n")
            .read(b"W0519 \xff\xfe binary noise\r\n")
            .read(b"Forwarding from 127.0.0.1:8080 -> 80\n")
            .read(b"no trailing newline")
            .build();
        let (tx, mut rx) = mpsc::channel(8);

        spawn_line_pump(stderr, OutputStream::Stderr, tx, "t".to_string())
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().text, "\u{FFFD}");
        assert_eq!(
            rx.recv().await.unwrap().text,
            "W0519 \u{FFFD}\u{FFFD} binary noise"
        );
        assert_eq!(
            rx.recv().await.unwrap().text,
            "Forwarding from 127.0.0.1:8080 -> 80"
        );
        assert_eq!(rx.recv().await.unwrap().text, "no trailing newline");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn pump_stops_when_receiver_is_dropped() {
        let stderr = Builder::new().read(b"a\nb\nc\n").build();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        spawn_line_pump(stderr, OutputStream::Stderr, tx, "t".to_string())
            .await
            .unwrap();
    }
}
