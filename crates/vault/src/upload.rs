//! Concurrent blob upload with a progress channel.
//!
//! Callers that want progress pass an unbounded sender and drain the receiver however they like;
//! the upload never waits on the consumer. Events carry the total bytes sent across all blobs
//! and are monotonically non-decreasing.

use crate::model::BlobUpload;
use crate::{VaultClient, VaultResult};
use futures::future::try_join_all;
use td_types::{AccessToken, BlobId, VaultId};
use tokio::sync::mpsc;

/// Aggregate progress across a batch of uploads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_loaded: u64,
    pub bytes_total: u64,
}

/// Per-blob progress handle passed to [`VaultClient::create_blob`].
#[derive(Clone, Debug)]
pub struct BlobProgress {
    index: usize,
    tx: mpsc::UnboundedSender<(usize, u64)>,
}

impl BlobProgress {
    /// Creates a standalone handle. Reports arrive on `tx` tagged with `index`.
    pub fn new(index: usize, tx: mpsc::UnboundedSender<(usize, u64)>) -> Self {
        Self { index, tx }
    }

    /// Reports the cumulative number of bytes sent for this blob.
    pub fn report(&self, bytes_loaded: u64) {
        // The aggregator may already be gone if the batch failed.
        let _ = self.tx.send((self.index, bytes_loaded));
    }
}

/// Uploads `blobs` concurrently and returns their ids in input order.
///
/// With no blobs a single `{0, 0}` event is emitted. Otherwise an event is emitted each time
/// the aggregate byte count grows. The whole batch fails if any upload fails; blobs already
/// stored are not removed.
pub async fn upload_blobs(
    client: &dyn VaultClient,
    token: &AccessToken,
    vault_id: &VaultId,
    blobs: Vec<BlobUpload>,
    progress: Option<mpsc::UnboundedSender<UploadProgress>>,
) -> VaultResult<Vec<BlobId>> {
    let bytes_total: u64 = blobs.iter().map(BlobUpload::len).sum();

    if blobs.is_empty() {
        if let Some(progress) = &progress {
            let _ = progress.send(UploadProgress {
                bytes_loaded: 0,
                bytes_total: 0,
            });
        }
        return Ok(Vec::new());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut per_blob = vec![0u64; blobs.len()];

    let uploads: Vec<_> = blobs
        .into_iter()
        .enumerate()
        .map(|(index, blob)| {
            client.create_blob(
                token,
                vault_id,
                blob,
                Some(BlobProgress::new(index, tx.clone())),
            )
        })
        .collect();
    drop(tx);

    let aggregate = async {
        let mut reported = 0u64;
        while let Some((index, loaded)) = rx.recv().await {
            if let Some(slot) = per_blob.get_mut(index) {
                *slot = (*slot).max(loaded);
            }
            let loaded_total = per_blob.iter().sum::<u64>().min(bytes_total);
            if loaded_total > reported {
                reported = loaded_total;
                if let Some(progress) = &progress {
                    let _ = progress.send(UploadProgress {
                        bytes_loaded: loaded_total,
                        bytes_total,
                    });
                }
            }
        }
    };

    let (ids, ()) = tokio::join!(try_join_all(uploads), aggregate);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryVault;

    fn collect(mut rx: mpsc::UnboundedReceiver<UploadProgress>) -> Vec<UploadProgress> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn empty_batch_reports_zero_total() {
        let vault = MemoryVault::new();
        let vault_id = VaultId::parse("cases").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        let ids = upload_blobs(&vault, vault.root_token(), &vault_id, Vec::new(), Some(tx))
            .await
            .unwrap();

        assert!(ids.is_empty());
        assert_eq!(
            collect(rx),
            vec![UploadProgress {
                bytes_loaded: 0,
                bytes_total: 0
            }]
        );
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_completes() {
        let vault = MemoryVault::new();
        let vault_id = VaultId::parse("cases").unwrap();
        let blobs = vec![
            BlobUpload::new("xray-1.png", vec![1u8; 200_000]),
            BlobUpload::new("xray-2.png", vec![2u8; 70_000]),
            BlobUpload::new("notes.txt", vec![3u8; 10]),
        ];
        let (tx, rx) = mpsc::unbounded_channel();

        let ids = upload_blobs(&vault, vault.root_token(), &vault_id, blobs, Some(tx))
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let events = collect(rx);
        assert!(!events.is_empty());
        assert!(events
            .windows(2)
            .all(|pair| pair[0].bytes_loaded <= pair[1].bytes_loaded));
        assert!(events.iter().all(|e| e.bytes_total == 270_010));
        assert_eq!(events.last().map(|e| e.bytes_loaded), Some(270_010));

        let stored = vault
            .get_blob(vault.root_token(), &vault_id, &ids[1])
            .await
            .unwrap();
        assert_eq!(stored.len(), 70_000);
    }

    #[tokio::test]
    async fn uploads_without_progress_channel() {
        let vault = MemoryVault::new();
        let vault_id = VaultId::parse("cases").unwrap();

        let ids = upload_blobs(
            &vault,
            vault.root_token(),
            &vault_id,
            vec![BlobUpload::new("a.bin", vec![0u8; 5])],
            None,
        )
        .await
        .unwrap();

        assert_eq!(ids.len(), 1);
    }
}
