//! MIT keytab file format (version 0x0502).
//!
//! A keytab is a sequence of length-prefixed records, all integers
//! big-endian:
//!
//! ```text
//! i32 size                 (negative: hole of |size| bytes, zero: end)
//! u16 num_components
//! u16 len + realm
//! (u16 len + component) * num_components
//! u32 name_type
//! u32 timestamp
//! u8  kvno8
//! u16 key_type
//! u16 len + key
//! [u32 kvno]               (present when the record has 4 bytes left)
//! ```

use std::path::Path;

use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::etype::EncryptionType;
use crate::keys::EncryptionKey;

const KEYTAB_VERSION: [u8; 2] = [0x05, 0x02];

/// Kerberos name type for service principals (`NT-SRV-INST`).
pub const NT_SRV_INST: u32 = 2;

/// Kerberos name type for user principals (`NT-PRINCIPAL`).
pub const NT_PRINCIPAL: u32 = 1;

/// One key for one principal at one key version.
#[derive(Clone)]
pub struct KeytabEntry {
    /// Realm of the principal.
    pub realm: String,
    /// Name components (e.g. `["HTTP", "vault.example.com"]`).
    pub components: Vec<String>,
    /// Kerberos name type.
    pub name_type: u32,
    /// Unix timestamp when the key was written.
    pub timestamp: u32,
    /// Key version number.
    pub kvno: u32,
    /// Raw encryption type number.
    pub key_type: i32,
    key: Zeroizing<Vec<u8>>,
}

impl KeytabEntry {
    /// Creates an entry for a key.
    pub fn new(
        realm: impl Into<String>,
        components: Vec<String>,
        kvno: u32,
        timestamp: u32,
        key: &EncryptionKey,
    ) -> Self {
        Self {
            realm: realm.into(),
            components,
            name_type: NT_PRINCIPAL,
            timestamp,
            kvno,
            key_type: key.etype().id(),
            key: Zeroizing::new(key.as_bytes().to_vec()),
        }
    }

    /// Overrides the name type.
    pub fn with_name_type(mut self, name_type: u32) -> Self {
        self.name_type = name_type;
        self
    }

    /// Principal rendered as `comp1/comp2@REALM`.
    pub fn principal(&self) -> String {
        format!("{}@{}", self.components.join("/"), self.realm)
    }

    /// Returns the key as a usable [`EncryptionKey`].
    ///
    /// # Errors
    ///
    /// Fails for encryption types this crate does not implement.
    pub fn key(&self) -> Result<EncryptionKey, CryptoError> {
        let etype = EncryptionType::from_id(self.key_type)?;
        EncryptionKey::from_bytes(etype, &self.key)
    }

    fn matches(&self, components: &[String], realm: Option<&str>) -> bool {
        self.components == components && realm.map_or(true, |r| self.realm == r)
    }
}

impl std::fmt::Debug for KeytabEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeytabEntry")
            .field("principal", &self.principal())
            .field("kvno", &self.kvno)
            .field("key_type", &self.key_type)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// An in-memory keytab.
#[derive(Debug, Clone, Default)]
pub struct Keytab {
    entries: Vec<KeytabEntry>,
}

impl Keytab {
    /// Creates an empty keytab.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    pub fn push(&mut self, entry: KeytabEntry) {
        self.entries.push(entry);
    }

    /// Returns all entries in file order.
    pub fn entries(&self) -> &[KeytabEntry] {
        &self.entries
    }

    /// Returns true when the keytab holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads and parses a keytab file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            CryptoError::MalformedKeytab(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::parse(&bytes)
    }

    /// Parses keytab bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut reader = Reader::new(bytes);
        let version = reader.take(2)?;
        if version != KEYTAB_VERSION {
            return Err(CryptoError::MalformedKeytab(format!(
                "unsupported version {:02x}{:02x}",
                version[0], version[1]
            )));
        }

        let mut entries = Vec::new();
        while !reader.is_empty() {
            let size = reader.i32()?;
            if size == 0 {
                break;
            }
            if size < 0 {
                reader.take(size.unsigned_abs() as usize)?;
                continue;
            }
            let record = reader.take(size as usize)?;
            entries.push(parse_entry(record)?);
        }

        Ok(Self { entries })
    }

    /// Serializes the keytab in version 0x0502 format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = KEYTAB_VERSION.to_vec();
        for entry in &self.entries {
            let record = encode_entry(entry);
            out.extend_from_slice(&(record.len() as i32).to_be_bytes());
            out.extend_from_slice(&record);
        }
        out
    }

    /// Finds the key for a principal.
    ///
    /// `realm = None` matches any realm. With `kvno = None` the highest key
    /// version for the encryption type wins.
    pub fn find(
        &self,
        components: &[String],
        realm: Option<&str>,
        key_type: i32,
        kvno: Option<u32>,
    ) -> Option<&KeytabEntry> {
        let candidates = self
            .entries
            .iter()
            .filter(|e| e.key_type == key_type && e.matches(components, realm));

        match kvno {
            Some(kvno) => candidates.into_iter().find(|e| e.kvno == kvno),
            None => candidates.max_by_key(|e| e.kvno),
        }
    }

    /// Returns true if any key exists for the principal.
    pub fn has_principal(&self, components: &[String], realm: Option<&str>) -> bool {
        self.entries.iter().any(|e| e.matches(components, realm))
    }
}

fn parse_entry(record: &[u8]) -> Result<KeytabEntry, CryptoError> {
    let mut reader = Reader::new(record);

    let count = reader.u16()?;
    let realm = reader.counted_string()?;
    let components = (0..count)
        .map(|_| reader.counted_string())
        .collect::<Result<Vec<_>, _>>()?;
    let name_type = reader.u32()?;
    let timestamp = reader.u32()?;
    let kvno8 = reader.u8()?;
    let key_type = i32::from(reader.u16()?);
    let key_len = reader.u16()? as usize;
    let key = Zeroizing::new(reader.take(key_len)?.to_vec());

    let kvno = if reader.remaining() >= 4 {
        match reader.u32()? {
            0 => u32::from(kvno8),
            kvno => kvno,
        }
    } else {
        u32::from(kvno8)
    };

    Ok(KeytabEntry {
        realm,
        components,
        name_type,
        timestamp,
        kvno,
        key_type,
        key,
    })
}

fn encode_entry(entry: &KeytabEntry) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entry.components.len() as u16).to_be_bytes());
    push_counted(&mut out, entry.realm.as_bytes());
    for component in &entry.components {
        push_counted(&mut out, component.as_bytes());
    }
    out.extend_from_slice(&entry.name_type.to_be_bytes());
    out.extend_from_slice(&entry.timestamp.to_be_bytes());
    out.push(entry.kvno.min(255) as u8);
    out.extend_from_slice(&(entry.key_type as u16).to_be_bytes());
    push_counted(&mut out, &entry.key);
    out.extend_from_slice(&entry.kvno.to_be_bytes());
    out
}

fn push_counted(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Big-endian cursor over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CryptoError> {
        if len > self.remaining() {
            return Err(CryptoError::MalformedKeytab(format!(
                "truncated: wanted {len} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CryptoError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CryptoError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CryptoError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, CryptoError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn counted_string(&mut self) -> Result<String, CryptoError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CryptoError::MalformedKeytab("non UTF-8 string".to_string()))
    }
}
