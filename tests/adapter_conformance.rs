//! Conformance suite run against every `StorageAdapter` implementation: the
//! same behavioral contract (§4.B) must hold regardless of backend.
//!
//! Only `LocalFsAdapter` is exercised here; an equivalent pass against
//! `S3Adapter` needs live or mocked bucket credentials and is left to an
//! integration environment that can provide them.

use syncmesh_engine::adapter::local::LocalFsAdapter;
use syncmesh_engine::StorageAdapter;

fn reader_from(bytes: &[u8]) -> Box<dyn tokio::io::AsyncRead + Send + Unpin> {
    Box::new(std::io::Cursor::new(bytes.to_vec()))
}

async fn read_all(adapter: &dyn StorageAdapter, path: &str) -> Vec<u8> {
    use tokio::io::AsyncReadExt;
    let mut reader = adapter.read(path).await.unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn write_read_delete_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = LocalFsAdapter::new(dir.path());

    adapter.write("doc.txt", reader_from(b"hello"), Some(5)).await.unwrap();
    assert_eq!(read_all(&adapter, "doc.txt").await, b"hello".to_vec());

    adapter.delete("doc.txt").await.unwrap();
    assert!(adapter.stat("doc.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_a_missing_path_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = LocalFsAdapter::new(dir.path());
    adapter.delete("never-existed.txt").await.unwrap();
}

#[tokio::test]
async fn write_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = LocalFsAdapter::new(dir.path());
    adapter.write("a/b/c.txt", reader_from(b"nested"), None).await.unwrap();
    assert_eq!(read_all(&adapter, "a/b/c.txt").await, b"nested".to_vec());
}

#[tokio::test]
async fn rename_moves_content_to_new_path() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = LocalFsAdapter::new(dir.path());
    adapter.write("old.txt", reader_from(b"data"), None).await.unwrap();
    adapter.rename("old.txt", "new.txt").await.unwrap();

    assert!(adapter.stat("old.txt").await.unwrap().is_none());
    assert_eq!(read_all(&adapter, "new.txt").await, b"data".to_vec());
}

#[tokio::test]
async fn hash_is_stable_for_identical_content() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = LocalFsAdapter::new(dir.path());
    adapter.write("a.txt", reader_from(b"same content"), None).await.unwrap();
    adapter.write("b.txt", reader_from(b"same content"), None).await.unwrap();

    let hash_a = adapter.hash("a.txt").await.unwrap();
    let hash_b = adapter.hash("b.txt").await.unwrap();
    assert_eq!(hash_a, hash_b);
}

#[tokio::test]
async fn list_includes_nested_files_and_directories() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = LocalFsAdapter::new(dir.path());
    adapter.create_directory("nested").await.unwrap();
    adapter.write("nested/file.txt", reader_from(b"x"), None).await.unwrap();
    adapter.write("top.txt", reader_from(b"y"), None).await.unwrap();

    let items = adapter.list("").await.unwrap();
    let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
    assert!(paths.contains(&"nested"));
    assert!(paths.contains(&"nested/file.txt"));
    assert!(paths.contains(&"top.txt"));
}

#[tokio::test]
async fn test_connection_fails_on_missing_root() {
    let adapter = LocalFsAdapter::new("/path/that/does/not/exist/anywhere");
    assert!(adapter.test_connection().await.is_err());
}
