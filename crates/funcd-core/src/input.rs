// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sources of raw protocol lines.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

/// An async stream of protocol lines.
///
/// `Ok(None)` means the input ended, which starts a shutdown.
#[async_trait]
pub trait LineInput: Send {
    /// Next raw line, without its trailing newline.
    async fn next_line(&mut self) -> std::io::Result<Option<String>>;
}

#[async_trait]
impl<R> LineInput for Lines<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        Lines::next_line(self).await
    }
}

#[async_trait]
impl LineInput for mpsc::Receiver<String> {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.recv().await)
    }
}

#[async_trait]
impl LineInput for mpsc::UnboundedReceiver<String> {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.recv().await)
    }
}

/// Lines read from the process stdin.
pub fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_lines() {
        let data: &[u8] = b"FUNCTION_CANCEL tx1\nQUIT\n";
        let mut lines = BufReader::new(data).lines();
        assert_eq!(
            LineInput::next_line(&mut lines).await.unwrap().as_deref(),
            Some("FUNCTION_CANCEL tx1")
        );
        assert_eq!(LineInput::next_line(&mut lines).await.unwrap().as_deref(), Some("QUIT"));
        assert_eq!(LineInput::next_line(&mut lines).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_channel_lines_end_when_closed() {
        let (tx, mut rx) = mpsc::channel(2);
        tx.send("QUIT".to_string()).await.unwrap();
        drop(tx);
        assert_eq!(rx.next_line().await.unwrap().as_deref(), Some("QUIT"));
        assert_eq!(rx.next_line().await.unwrap(), None);
    }
}
