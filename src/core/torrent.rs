//! Torrent descriptor publishing.
//!
//! A descriptor covers the regular files of a mapping sequence, in pipeline
//! order, under their destination paths. Pieces are SHA-1 hashes over the
//! files laid end to end. Unlike archives there is no retry loop: a failure
//! is returned to the caller immediately.

use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::core::atomic;
use crate::core::error::{FilesetError, FilesetResult};
use crate::core::mapper::{MappingPair, normalize_path};

const MIN_PIECE_LENGTH: u64 = 256 * 1024;
const MAX_PIECE_LENGTH: u64 = 16 * 1024 * 1024;
const TARGET_PIECE_COUNT: u64 = 2000;

/// Bencoded value. Dictionary keys stay sorted as the format requires.
#[derive(Debug, Clone, PartialEq)]
enum Bencode {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Bencode>),
    Dict(BTreeMap<Vec<u8>, Bencode>),
}

impl Bencode {
    fn str(value: &str) -> Self {
        Bencode::Bytes(value.as_bytes().to_vec())
    }

    fn int(value: u64) -> Self {
        Bencode::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }

    fn dict<const N: usize>(entries: [(&str, Bencode); N]) -> Self {
        Bencode::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v))
                .collect(),
        )
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Bencode::Int(i) => {
                out.push(b'i');
                out.extend_from_slice(i.to_string().as_bytes());
                out.push(b'e');
            }
            Bencode::Bytes(bytes) => {
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(bytes);
            }
            Bencode::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode(out);
                }
                out.push(b'e');
            }
            Bencode::Dict(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    Bencode::Bytes(key.clone()).encode(out);
                    value.encode(out);
                }
                out.push(b'e');
            }
        }
    }
}

pub struct TorrentPublisher {
    created_by: String,
}

impl Default for TorrentPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl TorrentPublisher {
    pub fn new() -> Self {
        Self {
            created_by: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    /// Writes a descriptor for `pairs` announcing to `tracker` at `target`
    /// (`.torrent` is appended when missing) and returns the final path.
    pub fn publish(
        &self,
        target: &Path,
        pairs: &[MappingPair],
        tracker: &str,
    ) -> FilesetResult<PathBuf> {
        let target = atomic::ensure_extension(&normalize_path(&target.to_string_lossy()), "torrent");
        if pairs.is_empty() {
            return Err(FilesetError::NoFilesMatched { target });
        }

        info!("Creating torrent {}", target.display());
        let name = target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let descriptor = self
            .build(&name, pairs, tracker)?
            .ok_or_else(|| FilesetError::EmptyTorrent {
                target: target.clone(),
            })?;

        atomic::write_file(&target, &descriptor)?;
        Ok(target)
    }

    /// Encodes the descriptor, or `None` when there is nothing to hash.
    fn build(
        &self,
        name: &str,
        pairs: &[MappingPair],
        tracker: &str,
    ) -> FilesetResult<Option<Vec<u8>>> {
        let files: Vec<&MappingPair> = pairs.iter().filter(|p| p.source.is_file()).collect();
        let total: u64 = files
            .iter()
            .map(|p| p.source.metadata().map(|m| m.len()).unwrap_or(0))
            .sum();
        if files.is_empty() || total == 0 {
            return Ok(None);
        }

        let piece_length = piece_length_for(total);
        let hashed = hash_pieces(&files, piece_length)?;
        if hashed.pieces.is_empty() {
            return Ok(None);
        }

        let mut info = BTreeMap::new();
        info.insert(b"piece length".to_vec(), Bencode::int(piece_length));
        info.insert(b"pieces".to_vec(), Bencode::Bytes(hashed.pieces));

        if let [single] = files.as_slice() {
            let file_name = path_components(&single.destination)
                .pop()
                .unwrap_or_else(|| name.to_string());
            info.insert(b"name".to_vec(), Bencode::str(&file_name));
            info.insert(b"length".to_vec(), Bencode::int(hashed.lengths[0]));
        } else {
            let entries = files
                .iter()
                .zip(&hashed.lengths)
                .map(|(pair, length)| {
                    Bencode::dict([
                        ("length", Bencode::int(*length)),
                        (
                            "path",
                            Bencode::List(
                                path_components(&pair.destination)
                                    .iter()
                                    .map(|c| Bencode::str(c))
                                    .collect(),
                            ),
                        ),
                    ])
                })
                .collect();
            info.insert(b"name".to_vec(), Bencode::str(name));
            info.insert(b"files".to_vec(), Bencode::List(entries));
        }

        let root = Bencode::dict([
            ("announce", Bencode::str(tracker)),
            ("created by", Bencode::str(&self.created_by)),
            ("info", Bencode::Dict(info)),
        ]);

        let mut out = Vec::new();
        root.encode(&mut out);
        Ok(Some(out))
    }
}

struct HashedFiles {
    pieces: Vec<u8>,
    lengths: Vec<u64>,
}

fn hash_pieces(files: &[&MappingPair], piece_length: u64) -> FilesetResult<HashedFiles> {
    let mut hasher = Sha1::new();
    let mut pieces = Vec::new();
    let mut lengths = Vec::with_capacity(files.len());
    let mut filled: u64 = 0;
    let mut buffer = vec![0u8; 64 * 1024];

    for pair in files {
        debug!("Hashing {}", pair.source.display());
        let mut file = File::open(&pair.source).map_err(|e| FilesetError::io(&pair.source, e))?;
        let mut length: u64 = 0;
        loop {
            let room = usize::try_from(piece_length - filled).unwrap_or(usize::MAX);
            let want = buffer.len().min(room);
            let read = file
                .read(&mut buffer[..want])
                .map_err(|e| FilesetError::io(&pair.source, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            filled += read as u64;
            length += read as u64;
            if filled == piece_length {
                pieces.extend_from_slice(&hasher.finalize_reset());
                filled = 0;
            }
        }
        lengths.push(length);
    }
    if filled > 0 {
        pieces.extend_from_slice(&hasher.finalize());
    }

    Ok(HashedFiles { pieces, lengths })
}

/// Smallest power of two from 256 KiB keeping the piece count near 2000.
fn piece_length_for(total: u64) -> u64 {
    let mut length = MIN_PIECE_LENGTH;
    while total.div_ceil(length) > TARGET_PIECE_COUNT && length < MAX_PIECE_LENGTH {
        length *= 2;
    }
    length
}

fn path_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const TRACKER: &str = "http://tracker:8020/announce";

    fn pair(dir: &Path, name: &str, content: &[u8]) -> MappingPair {
        let source = dir.join("src").join(name);
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, content).unwrap();
        MappingPair::new(source, name)
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    #[test]
    fn test_bencode_encoding() {
        let mut out = Vec::new();
        Bencode::dict([
            ("b", Bencode::List(vec![Bencode::Int(-3), Bencode::str("xy")])),
            ("a", Bencode::int(42)),
        ])
        .encode(&mut out);
        assert_eq!(out, b"d1:ai42e1:bli-3e2:xyee");
    }

    #[test]
    fn test_single_file_descriptor() {
        let dir = tempdir().unwrap();
        let pairs = vec![pair(dir.path(), "build.zip", b"zip bytes")];

        let path = TorrentPublisher::new()
            .publish(&dir.path().join("out/build"), &pairs, TRACKER)
            .unwrap();

        assert_eq!(path, dir.path().join("out/build.torrent"));
        let data = fs::read(&path).unwrap();
        assert!(data.starts_with(b"d8:announce28:http://tracker:8020/announce"));
        assert!(find(&data, b"6:lengthi9e").is_some());
        assert!(find(&data, b"4:name9:build.zip").is_some());
        assert!(find(&data, b"5:files").is_none());

        let at = find(&data, b"6:pieces20:").unwrap() + b"6:pieces20:".len();
        assert_eq!(&data[at..at + 20], Sha1::digest(b"zip bytes").as_slice());
        assert!(!atomic::temp_sibling(&path).exists());
    }

    #[test]
    fn test_multi_file_descriptor_hashes_files_end_to_end() {
        let dir = tempdir().unwrap();
        let pairs = vec![
            pair(dir.path(), "Game.exe", b"first"),
            pair(dir.path(), "Content/a.pak", b"second"),
        ];

        let path = TorrentPublisher::new()
            .publish(&dir.path().join("version.torrent"), &pairs, TRACKER)
            .unwrap();

        let data = fs::read(&path).unwrap();
        assert!(find(&data, b"4:name7:version").is_some());
        assert!(find(&data, b"d6:lengthi5e4:pathl8:Game.exeee").is_some());
        assert!(find(&data, b"d6:lengthi6e4:pathl7:Content5:a.pakee").is_some());

        let at = find(&data, b"6:pieces20:").unwrap() + b"6:pieces20:".len();
        assert_eq!(&data[at..at + 20], Sha1::digest(b"firstsecond").as_slice());
    }

    #[test]
    fn test_descriptor_is_reproducible() {
        let dir = tempdir().unwrap();
        let pairs = vec![pair(dir.path(), "a.bin", b"aaaa"), pair(dir.path(), "b.bin", b"bb")];
        let publisher = TorrentPublisher::new();

        let first = fs::read(publisher.publish(&dir.path().join("one"), &pairs, TRACKER).unwrap()).unwrap();
        let second = fs::read(publisher.publish(&dir.path().join("one"), &pairs, TRACKER).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_pairs_is_no_files_matched() {
        let dir = tempdir().unwrap();
        let err = TorrentPublisher::new()
            .publish(&dir.path().join("x"), &[], TRACKER)
            .unwrap_err();
        assert!(matches!(err, FilesetError::NoFilesMatched { .. }));
    }

    #[test]
    fn test_nothing_hashable_is_empty_torrent() {
        let dir = tempdir().unwrap();
        let pairs = vec![
            pair(dir.path(), "empty.txt", b""),
            MappingPair::new(dir.path().join("missing"), "missing"),
        ];
        let target = dir.path().join("x");

        let err = TorrentPublisher::new().publish(&target, &pairs, TRACKER).unwrap_err();

        assert!(matches!(err, FilesetError::EmptyTorrent { .. }));
        assert!(!dir.path().join("x.torrent").exists());
    }

    #[test]
    fn test_piece_length_grows_with_content() {
        assert_eq!(piece_length_for(1), MIN_PIECE_LENGTH);
        assert_eq!(piece_length_for(2000 * MIN_PIECE_LENGTH), MIN_PIECE_LENGTH);
        assert_eq!(piece_length_for(2000 * MIN_PIECE_LENGTH + 1), 2 * MIN_PIECE_LENGTH);
        assert_eq!(piece_length_for(u64::MAX / 2), MAX_PIECE_LENGTH);
    }
}
