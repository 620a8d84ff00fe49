//! Tests that exercise interaction with a live object store, but which can be performed against a
//! local Minio S3-compatible object storage server for greater convenience and lower cost.
//!
//! We're not testing Minio's compatibility with S3 but rather the correct behavior of our code
//! when talking to S3 or any S3-compatible endpoint (minio included).
use crate::Result;
use assert_matches::assert_matches;
use bytes::Bytes;
use fileop::{
    BlobStore, FileOpError, OperationOutput, OperationRegistry, OperationRequest, PutPolicy,
    S3BlobStore, SourceFile, UnzipDescriptor, UnzipReport, UploadStatus,
};
use fileop_testing::archives::{make_zip, TestEntry};
use fileop_testing::logging::test_with_logging;
use fileop_testing::minio::MinioServer;
use rand::prelude::*;
use std::sync::Arc;

/// Get the shared minio server, or `None` if minio isn't installed
async fn minio() -> Result<Option<Arc<MinioServer>>> {
    if !MinioServer::is_available() {
        tracing::warn!("minio is not installed; skipping test");
        return Ok(None);
    }

    Ok(Some(MinioServer::get().await?))
}

fn random_data(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);

    Bytes::from(data)
}

/// The hash of a single-part upload is the object's ETag, which for S3 is the hex MD5
#[test]
fn direct_put_returns_etag() -> Result<()> {
    test_with_logging(async move {
        let Some(server) = minio().await? else {
            return Ok(());
        };
        let bucket = server.create_bucket("direct_put").await?;
        let store = S3BlobStore::new(&server.config()).await;

        let token = store.issue_token(&PutPolicy::for_bucket(&bucket));
        let data = random_data(64 * 1024);
        let hash = store.put(&token, "dir/object.bin", data.clone()).await?;

        assert_eq!(32, hash.len());
        assert!(!hash.contains('"'));
        assert_eq!(data, server.get_object(&bucket, "dir/object.bin").await?);

        let head = server
            .aws_client()
            .await?
            .head_object()
            .bucket(&bucket)
            .key("dir/object.bin")
            .send()
            .await?;
        assert_eq!(Some(format!("\"{hash}\"").as_str()), head.e_tag());

        Ok(())
    })
}

#[test]
fn bucket_scope_does_not_overwrite() -> Result<()> {
    test_with_logging(async move {
        let Some(server) = minio().await? else {
            return Ok(());
        };
        let bucket = server.create_bucket("bucket_scope").await?;
        server.put_object(&bucket, "existing", "old").await?;
        let store = S3BlobStore::new(&server.config()).await;

        let token = store.issue_token(&PutPolicy::for_bucket(&bucket));
        let result = store.put(&token, "existing", Bytes::from("new")).await;

        assert_matches!(result, Err(FileOpError::ObjectExists { key, .. }) if key == "existing");
        assert_eq!(Bytes::from("old"), server.get_object(&bucket, "existing").await?);

        Ok(())
    })
}

#[test]
fn key_scope_overwrites() -> Result<()> {
    test_with_logging(async move {
        let Some(server) = minio().await? else {
            return Ok(());
        };
        let bucket = server.create_bucket("key_scope").await?;
        server.put_object(&bucket, "existing", "old").await?;
        let store = S3BlobStore::new(&server.config()).await;

        let token = store.issue_token(&PutPolicy::for_key(&bucket, "existing"));
        store.put(&token, "existing", Bytes::from("new")).await?;

        assert_eq!(Bytes::from("new"), server.get_object(&bucket, "existing").await?);

        // The same token can't be used for any other key
        let result = store.put(&token, "other", Bytes::from("new")).await;
        assert_matches!(result, Err(FileOpError::TokenScopeMismatch { .. }));
        assert!(!server.list_keys(&bucket).await?.contains(&"other".to_string()));

        Ok(())
    })
}

/// S3 requires parts of at least 5 MiB, so the requested 4 MiB chunks are sent as 5 MiB parts
#[test]
fn resumable_put_uploads_in_parts() -> Result<()> {
    test_with_logging(async move {
        let Some(server) = minio().await? else {
            return Ok(());
        };
        let bucket = server.create_bucket("resumable_put").await?;
        let store = S3BlobStore::new(&server.config()).await;

        let token = store.issue_token(&PutPolicy::for_bucket(&bucket));
        let data = random_data(12 * 1024 * 1024);
        let hash = store
            .resumable_put(&token, "big.bin", data.clone(), data.len() as u64, 4 * 1024 * 1024)
            .await?;

        // Multipart ETags carry the part count
        assert!(hash.ends_with("-3"), "unexpected multipart hash {hash}");
        assert_eq!(data, server.get_object(&bucket, "big.bin").await?);

        Ok(())
    })
}

/// The whole operation as a task runner would invoke it, with the archive itself read from S3
#[test]
fn unzip_archive_from_bucket() -> Result<()> {
    test_with_logging(async move {
        let Some(server) = minio().await? else {
            return Ok(());
        };
        let bucket = server.create_bucket("unzip_archive").await?;

        let entries = vec![
            TestEntry::file("readme.txt", "2 KiB"),
            TestEntry::dir("img"),
            TestEntry::file("img/1.png", "100 KiB"),
            TestEntry::file("img/2.png", "300 KiB"),
        ];
        let data = make_zip(&entries)?;
        server
            .put_object(&bucket, "incoming/archive.zip", data.clone())
            .await?;

        let registry = OperationRegistry::from_config(&server.config()).await;
        let cmd = UnzipDescriptor {
            bucket: bucket.clone(),
            prefix: "extracted/".to_string(),
            overwrite: false,
        }
        .to_command();
        let request = OperationRequest {
            req_id: "req-minio".to_string(),
            cmd,
            src: SourceFile {
                url: format!("s3://{bucket}/incoming/archive.zip"),
                mime_type: "application/zip".to_string(),
                size: data.len() as u64,
            },
        };

        let output = registry.run(&request).await?;
        let json = assert_matches!(output, OperationOutput::Json(json) => json);
        let report: UnzipReport = serde_json::from_value(json)?;

        assert_eq!(3, report.succeeded().count());
        assert_eq!(
            vec![
                "extracted/img/1.png",
                "extracted/img/2.png",
                "extracted/readme.txt",
                "incoming/archive.zip"
            ],
            server.list_keys(&bucket).await?
        );

        for entry in entries.iter().filter(|entry| entry.data().is_some()) {
            let key = format!("extracted/{}", entry.name());
            let stored = server.get_object(&bucket, &key).await?;
            assert_eq!(entry.data().unwrap(), &stored[..]);

            let outcome = report.files.iter().find(|outcome| outcome.key == key).unwrap();
            assert_matches!(&outcome.status, UploadStatus::Hash(hash) if hash.len() == 32);
        }

        Ok(())
    })
}
