use core::{cmp, fmt};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::io;
use std::io::{Read, Write};

use blake2::digest::consts::{U20, U32, U48};
use blake2::{Blake2b, Blake2b512};
use digest::{Digest, DynDigest};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512, Sha512_256};
use strum_macros::{Display as EnumDisplay, EnumString};

use crate::ocfl::error::{OcflError, Result};

type Blake2b160 = Blake2b<U20>;
type Blake2b256 = Blake2b<U32>;
type Blake2b384 = Blake2b<U48>;

/// Enum of all digest algorithms the library understands. Only `sha512` and `sha256` may be
/// used for content addressing; the rest, including the `size` pseudo-algorithm, are valid
/// in fixity blocks only.
#[derive(
    Deserialize, Serialize, Debug, Hash, Eq, PartialEq, Copy, Clone, EnumString, EnumDisplay,
)]
pub enum DigestAlgorithm {
    #[serde(rename = "md5")]
    #[strum(serialize = "md5")]
    Md5,
    #[serde(rename = "sha1")]
    #[strum(serialize = "sha1")]
    Sha1,
    #[serde(rename = "sha256")]
    #[strum(serialize = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    #[strum(serialize = "sha512")]
    Sha512,
    #[serde(rename = "sha512/256")]
    #[strum(serialize = "sha512/256")]
    Sha512_256,
    #[serde(rename = "blake2b-512")]
    #[strum(serialize = "blake2b-512")]
    Blake2b512,
    #[serde(rename = "blake2b-160")]
    #[strum(serialize = "blake2b-160")]
    Blake2b160,
    #[serde(rename = "blake2b-256")]
    #[strum(serialize = "blake2b-256")]
    Blake2b256,
    #[serde(rename = "blake2b-384")]
    #[strum(serialize = "blake2b-384")]
    Blake2b384,
    /// Pseudo-algorithm whose "digest" is the decimal count of content bytes
    #[serde(rename = "size")]
    #[strum(serialize = "size")]
    Size,
}

/// A stateful digest computation. Obtained from `DigestAlgorithm::digester()`.
pub trait Digester: Send {
    fn update(&mut self, bytes: &[u8]);

    fn finalize_hex(self: Box<Self>) -> HexDigest;
}

struct CryptoDigester(Box<dyn DynDigest + Send>);

struct ByteCounter(u64);

impl Digester for CryptoDigester {
    fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn finalize_hex(self: Box<Self>) -> HexDigest {
        HexDigest(hex::encode(self.0.finalize()))
    }
}

impl Digester for ByteCounter {
    fn update(&mut self, bytes: &[u8]) {
        self.0 += bytes.len() as u64;
    }

    fn finalize_hex(self: Box<Self>) -> HexDigest {
        HexDigest(self.0.to_string())
    }
}

impl DigestAlgorithm {
    /// True for the algorithms that may be used as an inventory's `digestAlgorithm`
    pub fn content_addressing(self) -> bool {
        matches!(self, DigestAlgorithm::Sha512 | DigestAlgorithm::Sha256)
    }

    pub fn digester(self) -> Box<dyn Digester> {
        match self {
            DigestAlgorithm::Md5 => Box::new(CryptoDigester(Box::new(Md5::new()))),
            DigestAlgorithm::Sha1 => Box::new(CryptoDigester(Box::new(Sha1::new()))),
            DigestAlgorithm::Sha256 => Box::new(CryptoDigester(Box::new(Sha256::new()))),
            DigestAlgorithm::Sha512 => Box::new(CryptoDigester(Box::new(Sha512::new()))),
            DigestAlgorithm::Sha512_256 => Box::new(CryptoDigester(Box::new(Sha512_256::new()))),
            DigestAlgorithm::Blake2b512 => Box::new(CryptoDigester(Box::new(Blake2b512::new()))),
            DigestAlgorithm::Blake2b160 => Box::new(CryptoDigester(Box::new(Blake2b160::new()))),
            DigestAlgorithm::Blake2b256 => Box::new(CryptoDigester(Box::new(Blake2b256::new()))),
            DigestAlgorithm::Blake2b384 => Box::new(CryptoDigester(Box::new(Blake2b384::new()))),
            DigestAlgorithm::Size => Box::new(ByteCounter(0)),
        }
    }

    /// Drains the reader and returns its hex encoded digest
    pub fn hash_hex(self, data: &mut impl Read) -> Result<HexDigest> {
        let mut reader = self.reader(data);
        io::copy(&mut reader, &mut io::sink()).map_err(|e| OcflError::io("read", "<hash>", e))?;
        Ok(reader.finalize_hex())
    }

    /// Wraps a reader so that bytes are digested as they are read
    pub fn reader<R: Read>(self, reader: R) -> DigestReader<R> {
        DigestReader {
            digest: self.digester(),
            inner: reader,
        }
    }

    /// Wraps a writer so that bytes are digested as they are written
    pub fn writer<W: Write>(self, writer: W) -> DigestWriter<W> {
        DigestWriter {
            digest: self.digester(),
            inner: writer,
        }
    }
}

/// Maps algorithm ids to `DigestAlgorithm`s. The registry is passed by value wherever an
/// algorithm id is parsed from untrusted input; there is no process-wide mutable instance.
#[derive(Debug, Clone)]
pub struct AlgorithmRegistry {
    algorithms: HashSet<DigestAlgorithm>,
}

impl AlgorithmRegistry {
    /// The standard registry: every algorithm this library implements
    pub fn standard() -> Self {
        Self {
            algorithms: [
                DigestAlgorithm::Md5,
                DigestAlgorithm::Sha1,
                DigestAlgorithm::Sha256,
                DigestAlgorithm::Sha512,
                DigestAlgorithm::Sha512_256,
                DigestAlgorithm::Blake2b512,
                DigestAlgorithm::Blake2b160,
                DigestAlgorithm::Blake2b256,
                DigestAlgorithm::Blake2b384,
                DigestAlgorithm::Size,
            ]
            .into_iter()
            .collect(),
        }
    }

    /// A registry limited to the supplied algorithms
    pub fn of(algorithms: impl IntoIterator<Item = DigestAlgorithm>) -> Self {
        Self {
            algorithms: algorithms.into_iter().collect(),
        }
    }

    /// Resolves an algorithm id, or `UnknownAlgorithm` if it is not registered
    pub fn parse(&self, id: &str) -> Result<DigestAlgorithm> {
        id.parse::<DigestAlgorithm>()
            .ok()
            .filter(|a| self.algorithms.contains(a))
            .ok_or_else(|| OcflError::UnknownAlgorithm(id.to_string()))
    }

    pub fn contains(&self, algorithm: DigestAlgorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Reader wrapper that digests while reading
pub struct DigestReader<R: Read> {
    digest: Box<dyn Digester>,
    inner: R,
}

/// Writer wrapper that digests while writing
pub struct DigestWriter<W: Write> {
    digest: Box<dyn Digester>,
    inner: W,
}

/// Writer wrapper that feeds one byte stream to any number of digest algorithms
pub struct MultiDigestWriter<W: Write> {
    digests: HashMap<DigestAlgorithm, Box<dyn Digester>>,
    inner: W,
}

impl<R: Read> DigestReader<R> {
    pub fn finalize_hex(self) -> HexDigest {
        self.digest.finalize_hex()
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.digest.update(&buf[..n]);
        }
        Ok(n)
    }
}

impl<W: Write> DigestWriter<W> {
    pub fn finalize_hex(self) -> HexDigest {
        self.digest.finalize_hex()
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.digest.update(&buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> MultiDigestWriter<W> {
    pub fn new(algorithms: &[DigestAlgorithm], writer: W) -> Self {
        let mut digests = HashMap::with_capacity(algorithms.len());
        for algorithm in algorithms {
            digests.insert(*algorithm, algorithm.digester());
        }

        Self {
            digests,
            inner: writer,
        }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    /// Finishes one algorithm's computation and returns its digest
    pub fn sum(&mut self, algorithm: DigestAlgorithm) -> Option<HexDigest> {
        self.digests.remove(&algorithm).map(|d| d.finalize_hex())
    }

    /// Finishes every remaining computation
    pub fn sums(self) -> HashMap<DigestAlgorithm, HexDigest> {
        self.digests
            .into_iter()
            .map(|(algorithm, digest)| (algorithm, digest.finalize_hex()))
            .collect()
    }
}

impl<W: Write> Write for MultiDigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            let part = &buf[..n];
            self.digests.values_mut().for_each(|d| d.update(part));
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A digest rendered as a hex string. The original case is preserved, but comparison,
/// ordering, and hashing are all case insensitive.
#[derive(Deserialize, Serialize, Debug, Eq, Clone)]
pub struct HexDigest(String);

impl HexDigest {
    /// Returns a lowercase copy
    pub fn normalized(&self) -> HexDigest {
        HexDigest(self.0.to_ascii_lowercase())
    }

    pub fn is_normalized(&self) -> bool {
        !self.0.bytes().any(|b| b.is_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HexDigest {
    fn from(digest: &str) -> Self {
        Self(digest.to_string())
    }
}

impl From<String> for HexDigest {
    fn from(digest: String) -> Self {
        Self(digest)
    }
}

impl From<HexDigest> for String {
    fn from(digest: HexDigest) -> Self {
        digest.0
    }
}

impl AsRef<str> for HexDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Ord for HexDigest {
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.0.as_bytes();
        let right = other.0.as_bytes();

        let l = cmp::min(left.len(), right.len());

        for i in 0..l {
            match left[i]
                .to_ascii_lowercase()
                .cmp(&right[i].to_ascii_lowercase())
            {
                Ordering::Equal => (),
                non_eq => return non_eq,
            }
        }

        left.len().cmp(&right.len())
    }
}

impl PartialOrd for HexDigest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HexDigest {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for HexDigest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl Display for HexDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{AlgorithmRegistry, DigestAlgorithm, HexDigest, MultiDigestWriter};

    const EMPTY_SHA512: &str =
        "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff831\
         8d2877eec2f63b931bd47417a81a538327af927da3e";
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const EMPTY_SHA1: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    #[test]
    fn empty_input_produces_published_digests() {
        let empty: &[u8] = &[];
        let cases = [
            (DigestAlgorithm::Sha512, EMPTY_SHA512),
            (DigestAlgorithm::Sha256, EMPTY_SHA256),
            (DigestAlgorithm::Sha1, EMPTY_SHA1),
            (DigestAlgorithm::Md5, EMPTY_MD5),
        ];

        for (algorithm, expected) in cases {
            let actual = algorithm.hash_hex(&mut io::Cursor::new(empty)).unwrap();
            assert_eq!(expected, actual.to_string(), "{algorithm}");
        }
    }

    #[test]
    fn size_pseudo_algorithm_counts_bytes() {
        let digest = DigestAlgorithm::Size
            .hash_hex(&mut "hello\n".as_bytes())
            .unwrap();
        assert_eq!("6", digest.to_string());
    }

    #[test]
    fn digest_while_reading() {
        let input = "testing\n";
        let mut reader = DigestAlgorithm::Sha256.reader(input.as_bytes());
        let mut out = Vec::new();
        io::copy(&mut reader, &mut out).unwrap();

        assert_eq!(input.as_bytes(), out.as_slice());
        assert_eq!(
            "12a61f4e173fb3a11c05d6471f74728f76231b4a5fcd9667cef3af87a3ae4dc2",
            reader.finalize_hex().to_string()
        );
    }

    #[test]
    fn digest_while_writing() {
        let mut writer = DigestAlgorithm::Sha256.writer(io::sink());
        io::copy(&mut "testing\n".as_bytes(), &mut writer).unwrap();
        assert_eq!(
            "12a61f4e173fb3a11c05d6471f74728f76231b4a5fcd9667cef3af87a3ae4dc2",
            writer.finalize_hex().to_string()
        );
    }

    #[test]
    fn multi_digest_feeds_every_algorithm() {
        let mut writer = MultiDigestWriter::new(
            &[
                DigestAlgorithm::Md5,
                DigestAlgorithm::Sha256,
                DigestAlgorithm::Size,
            ],
            io::sink(),
        );

        io::copy(&mut "testing\n".as_bytes(), &mut writer).unwrap();

        assert_eq!(
            "12a61f4e173fb3a11c05d6471f74728f76231b4a5fcd9667cef3af87a3ae4dc2",
            writer.sum(DigestAlgorithm::Sha256).unwrap().to_string()
        );

        let rest = writer.sums();
        assert_eq!(
            "eb1a3227cdc3fedbaec2fe38bf6c044a",
            rest.get(&DigestAlgorithm::Md5).unwrap().to_string()
        );
        assert_eq!("8", rest.get(&DigestAlgorithm::Size).unwrap().to_string());
    }

    #[test]
    fn hex_digests_compare_case_insensitively() {
        let upper = HexDigest::from("ABCDEF");
        let lower = HexDigest::from("abcdef");

        assert_eq!(upper, lower);
        assert_eq!("ABCDEF", upper.to_string());
        assert_eq!("abcdef", upper.normalized().to_string());
        assert!(!upper.is_normalized());
        assert!(lower.is_normalized());
    }

    #[test]
    fn registry_resolves_known_ids() {
        let registry = AlgorithmRegistry::standard();
        assert_eq!(
            DigestAlgorithm::Blake2b512,
            registry.parse("blake2b-512").unwrap()
        );
        assert!(registry.parse("md6").is_err());

        let restricted = AlgorithmRegistry::of([DigestAlgorithm::Sha512]);
        assert!(restricted.parse("md5").is_err());
        assert!(restricted.contains(DigestAlgorithm::Sha512));
        assert!(!restricted.contains(DigestAlgorithm::Md5));
    }
}
