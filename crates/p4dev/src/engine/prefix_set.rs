//! Prefix tree of a longest prefix match table and its boundary encoding.
//!
//! A [`PrefixSet`] keeps every prefix under the most specific prefix that
//! contains it, siblings sorted by key and then by length. The hardware
//! does not walk a tree: it binary-searches a sorted list of boundaries,
//! each boundary carrying the data valid from that key up to the next one.
//! [`PrefixSet::dump`] flattens the tree into that list and
//! [`PrefixSet::restore`] rebuilds an equivalent tree from it.
//!
//! Keys are byte strings whose prefix bits run from the most significant
//! bit of byte 0. Keys and data are always padded to whole 32-bit words.

use p4dev_hw::lpm::LPM_VALID_FLAG;
use p4dev_hw::transaction::{bytes_to_words, word_count, words_to_bytes};
use p4dev_hw::{P4DevError, P4DevResult};
use std::cmp::Ordering;
use std::fmt;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn byte_len(bits: u32) -> usize {
    word_count(bits) * 4
}

/// Clears every bit of `key` past the first `len`.
fn mask(key: &mut [u8], len: u32) {
    let bytes = (len >> 3) as usize;
    if bytes < key.len() {
        key[bytes] &= (0xff00u16 >> (len & 7)) as u8;
        key[bytes + 1..].fill(0);
    }
}

/// First key past the range covered by `key/len`.
///
/// The flag is set when the range reaches the end of the key space and no
/// such key exists.
fn last_key(key: &[u8], len: u32) -> (Vec<u8>, bool) {
    let mut out = key.to_vec();
    if len == 0 || len as usize > key.len() * 8 {
        return (out, true);
    }

    let mut index = ((len - 1) >> 3) as usize;
    let mut add = 0x80u8 >> ((len - 1) & 7);
    loop {
        let (value, carry) = out[index].overflowing_add(add);
        out[index] = value;
        if !carry {
            return (out, false);
        }
        if index == 0 {
            return (out, true);
        }
        index -= 1;
        add = 1;
    }
}

/// True if bit `bit` of `key`, counted from the most significant bit of
/// byte 0, is set.
fn key_bit(key: &[u8], bit: u32) -> bool {
    key.get((bit >> 3) as usize)
        .is_some_and(|byte| byte & (0x80 >> (bit & 7)) != 0)
}

/// True if `key` lies within `prefix/len`.
pub(crate) fn prefix_matches(prefix: &[u8], len: u32, key: &[u8]) -> bool {
    let bytes = (len >> 3) as usize;
    if prefix.get(..bytes) != key.get(..bytes) {
        return false;
    }
    if len & 7 == 0 {
        return true;
    }
    let mask = (0xff00u16 >> (len & 7)) as u8;
    match (prefix.get(bytes), key.get(bytes)) {
        (Some(p), Some(k)) => *p == k & mask,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    key: Vec<u8>,
    len: u32,
    data: Vec<u8>,
    children: Vec<Node>,
}

impl Node {
    /// True if `other` is this prefix or lies within it.
    fn contains(&self, other: &Node) -> bool {
        other.len >= self.len && prefix_matches(&self.key, self.len, &other.key)
    }

    fn cmp_prefix(&self, other: &Node) -> Ordering {
        self.key.cmp(&other.key).then(self.len.cmp(&other.len))
    }
}

/// Longest prefix match rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixSet {
    key_width: u32,
    data_width: u32,
    root: Node,
    size: usize,
}

impl PrefixSet {
    /// Creates a set whose `/0` prefix maps to all-zero data.
    pub fn new(key_width: u32, data_width: u32) -> Self {
        Self {
            key_width,
            data_width,
            root: Node {
                key: vec![0; byte_len(key_width)],
                len: 0,
                data: vec![0; byte_len(data_width)],
                children: Vec::new(),
            },
            size: 1,
        }
    }

    pub fn key_width(&self) -> u32 {
        self.key_width
    }

    pub fn data_width(&self) -> u32 {
        self.data_width
    }

    /// Number of distinct prefixes, the implicit `/0` included.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Data of the `/0` prefix.
    pub fn default_data(&self) -> &[u8] {
        &self.root.data
    }

    pub fn set_default_data(&mut self, data: &[u8]) {
        self.root.data = self.pad_data(data);
    }

    fn pad_key(&self, key: &[u8]) -> Vec<u8> {
        let mut out = key.to_vec();
        out.resize(byte_len(self.key_width), 0);
        out
    }

    fn pad_data(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        out.resize(byte_len(self.data_width), 0);
        out
    }

    /// Maps `key/len` to `data`, replacing the data of an equal prefix.
    ///
    /// Bits of `key` past `len` are ignored. A zero length sets the default
    /// data.
    pub fn add(&mut self, key: &[u8], len: u32, data: &[u8]) -> P4DevResult<()> {
        if len > self.key_width {
            return Err(P4DevError::invalid_rule(format!(
                "prefix length {} exceeds the {} bit key",
                len, self.key_width
            )));
        }
        if len == 0 {
            self.set_default_data(data);
            return Ok(());
        }

        let mut key = self.pad_key(key);
        mask(&mut key, len);
        let mut item = Node {
            key,
            len,
            data: self.pad_data(data),
            children: Vec::new(),
        };

        let mut node = &mut self.root;
        loop {
            let mut index = 0;
            while index < node.children.len() {
                match node.children[index].cmp_prefix(&item) {
                    Ordering::Equal => {
                        node.children[index].data = item.data;
                        return Ok(());
                    }
                    Ordering::Greater => break,
                    Ordering::Less => index += 1,
                }
            }

            if index > 0 && node.children[index - 1].contains(&item) {
                node = &mut node.children[index - 1];
                continue;
            }

            let adopted = node.children[index..]
                .iter()
                .take_while(|sibling| item.contains(sibling))
                .count();
            item.children = node.children.drain(index..index + adopted).collect();
            node.children.insert(index, item);
            self.size += 1;
            return Ok(());
        }
    }

    /// Data of the longest prefix matching `key`.
    pub fn lookup(&self, key: &[u8]) -> &[u8] {
        let mut node = &self.root;
        while let Some(child) = node
            .children
            .iter()
            .find(|c| prefix_matches(&c.key, c.len, key))
        {
            node = child;
        }
        &node.data
    }

    /// Flattens the tree into sorted boundary records.
    ///
    /// Record 0 always holds the all-zero key. A record whose key equals
    /// its predecessor's replaces it, and a record repeating its
    /// predecessor's data is left out.
    pub fn dump(&self) -> PrefixDump {
        let mut records = vec![(vec![0; byte_len(self.key_width)], self.root.data.clone())];
        Self::dump_node(&self.root, &mut records);
        PrefixDump {
            key_width: self.key_width,
            data_width: self.data_width,
            records,
        }
    }

    fn dump_node(node: &Node, out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
        for child in &node.children {
            if out.last().is_some_and(|(key, _)| *key == child.key) {
                out.pop();
            }
            if out.last().map_or(true, |(_, data)| *data != child.data) {
                out.push((child.key.clone(), child.data.clone()));
            }

            Self::dump_node(child, out);

            let (end, overflow) = last_key(&child.key, child.len);
            if overflow {
                continue;
            }
            if let Some((key, data)) = out.last_mut() {
                if *data == node.data {
                    continue;
                }
                if *key == end {
                    *data = node.data.clone();
                    continue;
                }
            }
            out.push((end, node.data.clone()));
        }
    }

    /// Rebuilds a set answering every lookup like the one `dump` came from.
    ///
    /// Each boundary range is covered by the fewest aligned prefixes. The
    /// tree may differ from the original one.
    pub fn restore(dump: &PrefixDump) -> P4DevResult<Self> {
        let mut set = Self::new(dump.key_width, dump.data_width);
        let records = dump.records();
        let Some((_, first)) = records.first() else {
            return Ok(set);
        };
        set.set_default_data(first);

        let width = dump.key_width;
        let mut key = set.pad_key(&[]);
        let mut data = first.clone();
        let mut cursor = 1;

        loop {
            let next = records.get(cursor);
            let mut len = width;
            loop {
                let (end, overflow) = last_key(&key, len);
                if overflow && next.is_none() {
                    set.add(&key, len, &data)?;
                    return Ok(set);
                }

                let mut ord = match next {
                    _ if overflow => Ordering::Greater,
                    Some((next_key, _)) => end.cmp(&set.pad_key(next_key)),
                    None => Ordering::Less,
                };
                if len != width && key_bit(&key, len) {
                    ord = Ordering::Greater;
                }

                match ord {
                    Ordering::Equal => {
                        set.add(&key, len, &data)?;
                        if let Some((next_key, next_data)) = next {
                            key = set.pad_key(next_key);
                            data = next_data.clone();
                        }
                        cursor += 1;
                        break;
                    }
                    Ordering::Greater if len == width => {
                        // boundary at or below the current key
                        cursor += 1;
                        break;
                    }
                    Ordering::Greater => {
                        len += 1;
                        set.add(&key, len, &data)?;
                        key = last_key(&key, len).0;
                        break;
                    }
                    Ordering::Less => len = len.saturating_sub(1),
                }
            }
        }
    }
}

impl fmt::Display for PrefixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(&self.root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            writeln!(
                f,
                "{}0x{}/{}  ->  0x{}",
                " | ".repeat(depth),
                hex(&node.key),
                node.len,
                hex(&node.data)
            )?;
            stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
        }
        Ok(())
    }
}

/// Boundary records of a prefix set, in ascending key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixDump {
    key_width: u32,
    data_width: u32,
    records: Vec<(Vec<u8>, Vec<u8>)>,
}

impl PrefixDump {
    pub fn key_width(&self) -> u32 {
        self.key_width
    }

    pub fn data_width(&self) -> u32 {
        self.data_width
    }

    /// `(key, data)` of every record.
    pub fn records(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Words per encoded record, control word included.
    pub fn item_words(&self) -> usize {
        word_count(self.key_width) + word_count(self.data_width) + 1
    }

    /// Encodes record `index`: key words, data words, then the address
    /// with the valid flag.
    pub fn encode_record(&self, index: usize) -> Option<Vec<u32>> {
        let (key, data) = self.records.get(index)?;
        let mut words = bytes_to_words(key);
        words.resize(word_count(self.key_width), 0);
        let mut data_words = bytes_to_words(data);
        data_words.resize(word_count(self.data_width), 0);
        words.extend(data_words);
        words.push(index as u32 | LPM_VALID_FLAG);
        Some(words)
    }

    /// Encodes every record followed by an all-zero terminator record.
    pub fn to_words(&self) -> Vec<u32> {
        let mut words: Vec<u32> = (0..self.records.len())
            .filter_map(|index| self.encode_record(index))
            .flatten()
            .collect();
        words.resize(words.len() + self.item_words(), 0);
        words
    }

    /// Decodes records until the first one without the valid flag.
    ///
    /// Record 0 is taken as the `/0` boundary whatever its flag and key.
    pub fn from_words(key_width: u32, data_width: u32, words: &[u32]) -> Self {
        let key_words = word_count(key_width);
        let data_words = word_count(data_width);
        let item_words = key_words + data_words + 1;

        let mut records = Vec::new();
        for (index, item) in words.chunks_exact(item_words).enumerate() {
            if index > 0 && item[item_words - 1] & LPM_VALID_FLAG == 0 {
                break;
            }
            let key = if index == 0 {
                vec![0; key_words * 4]
            } else {
                words_to_bytes(&item[..key_words])
            };
            records.push((key, words_to_bytes(&item[key_words..key_words + data_words])));
        }

        Self {
            key_width,
            data_width,
            records,
        }
    }
}

impl fmt::Display for PrefixDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, data)) in self.records.iter().enumerate() {
            writeln!(f, "{:4}: 0x{}  ->  0x{}", index, hex(key), hex(data))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn k(byte: u8) -> Vec<u8> {
        vec![byte, 0, 0, 0]
    }

    fn d(byte: u8) -> Vec<u8> {
        vec![byte, 0, 0, 0]
    }

    fn sample() -> PrefixSet {
        let mut set = PrefixSet::new(8, 8);
        set.set_default_data(b"Z");
        set.add(&[0b1000_0000], 2, b"A").unwrap();
        set.add(&[0b1010_0000], 4, b"B").unwrap();
        set
    }

    #[test]
    fn test_last_key() {
        assert_eq!(last_key(&[0x80, 0], 2), (vec![0xc0, 0], false));
        assert_eq!(last_key(&[0x0a, 0xff], 16), (vec![0x0b, 0x00], false));
        assert_eq!(last_key(&[0xc0, 0], 2).1, true);
        assert_eq!(last_key(&[0x00, 0], 0).1, true);
        assert_eq!(last_key(&[0x00, 0], 17).1, true);
    }

    #[test]
    fn test_mask_and_match() {
        let mut key = vec![0xff, 0xff, 0xff];
        mask(&mut key, 10);
        assert_eq!(key, vec![0xff, 0xc0, 0x00]);

        assert!(prefix_matches(&[0x80], 2, &[0xb0]));
        assert!(!prefix_matches(&[0x80], 2, &[0x40]));
        assert!(prefix_matches(&[0x0a, 0x00], 8, &[0x0a, 0x63]));
        assert!(key_bit(&[0x20], 2));
        assert!(!key_bit(&[0x20], 3));
    }

    #[test]
    fn test_longest_prefix_match() {
        let set = sample();
        assert_eq!(set.lookup(&k(0b1011_0000)), d(b'A'));
        assert_eq!(set.lookup(&k(0b1010_0000)), d(b'B'));
        assert_eq!(set.lookup(&k(0b0000_0000)), d(b'Z'));
        assert_eq!(set.lookup(&k(0b1100_0000)), d(b'Z'));
    }

    #[test]
    fn test_insert_order_does_not_matter() {
        let mut reversed = PrefixSet::new(8, 8);
        reversed.set_default_data(b"Z");
        reversed.add(&[0b1010_0000], 4, b"B").unwrap();
        reversed.add(&[0b1000_0000], 2, b"A").unwrap();
        assert_eq!(reversed, sample());
        assert_eq!(reversed.to_string(), sample().to_string());
    }

    #[test]
    fn test_size() {
        let mut set = sample();
        assert_eq!(set.size(), 3);

        // replacing data and touching /0 add nothing
        set.add(&[0b1000_0000], 2, b"C").unwrap();
        set.add(&[0xff], 0, b"Y").unwrap();
        assert_eq!(set.size(), 3);
        assert_eq!(set.lookup(&k(0b1001_0000)), d(b'C'));
        assert_eq!(set.default_data(), d(b'Y'));

        assert!(matches!(
            set.add(&[0xff], 9, b"X"),
            Err(P4DevError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_dump_boundaries() {
        let mut set = PrefixSet::new(8, 8);
        set.set_default_data(b"Z");
        set.add(&[0b1000_0000], 2, b"A").unwrap();
        assert_eq!(
            set.dump().records(),
            &[(k(0x00), d(b'Z')), (k(0x80), d(b'A')), (k(0xc0), d(b'Z'))]
        );

        let dump = sample().dump();
        assert_eq!(
            dump.records(),
            &[
                (k(0x00), d(b'Z')),
                (k(0x80), d(b'A')),
                (k(0xa0), d(b'B')),
                (k(0xb0), d(b'A')),
                (k(0xc0), d(b'Z')),
            ]
        );
    }

    #[test]
    fn test_dump_elides_redundant_records() {
        // a prefix at key 0 replaces the default boundary
        let mut set = PrefixSet::new(8, 8);
        set.add(&[0x00], 1, b"A").unwrap();
        assert_eq!(set.dump().records(), &[(k(0x00), d(b'A')), (k(0x80), d(0))]);

        // a child with its parent's data adds no boundary
        let mut set = PrefixSet::new(8, 8);
        set.add(&[0x80], 1, b"A").unwrap();
        set.add(&[0xc0], 2, b"A").unwrap();
        assert_eq!(set.dump().records(), &[(k(0x00), d(0)), (k(0x80), d(b'A'))]);
    }

    #[test]
    fn test_restore_answers_like_original() {
        let mut set = PrefixSet::new(8, 8);
        set.set_default_data(b"Z");
        for (key, len, data) in [
            (0b1000_0000, 2, b'A'),
            (0b1010_0000, 4, b'B'),
            (0b0001_0000, 4, b'C'),
            (0b0001_0110, 7, b'D'),
            (0b1111_1111, 8, b'E'),
            (0b0100_0000, 3, b'Z'),
        ] {
            set.add(&[key], len, &[data]).unwrap();
        }

        let restored = PrefixSet::restore(&set.dump()).unwrap();
        for key in 0..=255u8 {
            assert_eq!(restored.lookup(&k(key)), set.lookup(&k(key)), "key {:08b}", key);
        }
    }

    #[test]
    fn test_restore_host_prefixes_at_range_ends() {
        let mut set = PrefixSet::new(8, 8);
        set.set_default_data(b"Z");
        set.add(&[0x00], 8, b"F").unwrap();
        set.add(&[0x7f], 8, b"M").unwrap();
        set.add(&[0xff], 8, b"E").unwrap();

        let dump = set.dump();
        let decoded = PrefixDump::from_words(8, 8, &dump.to_words());
        let restored = PrefixSet::restore(&decoded).unwrap();
        for key in 0..=255u8 {
            assert_eq!(restored.lookup(&k(key)), set.lookup(&k(key)), "key {:08b}", key);
        }
        assert_eq!(restored.lookup(&k(0xff)), d(b'E'));
        assert_eq!(restored.lookup(&k(0xfe)), d(b'Z'));
    }

    #[test]
    fn test_restore_default_only() {
        let mut set = PrefixSet::new(8, 8);
        set.set_default_data(b"Z");
        let restored = PrefixSet::restore(&set.dump()).unwrap();
        assert_eq!(restored.size(), 1);
        assert_eq!(restored.default_data(), d(b'Z'));
    }

    #[test]
    fn test_wire_format() {
        let dump = sample().dump();
        assert_eq!(dump.item_words(), 3);
        assert_eq!(
            dump.encode_record(1),
            Some(vec![0x80, u32::from(b'A'), 1 | LPM_VALID_FLAG])
        );
        assert_eq!(dump.encode_record(5), None);

        let words = dump.to_words();
        assert_eq!(words.len(), 6 * 3);
        assert_eq!(&words[15..], &[0, 0, 0]);
        assert_eq!(PrefixDump::from_words(8, 8, &words), dump);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            sample().to_string(),
            "0x00000000/0  ->  0x5a000000\n \
             | 0x80000000/2  ->  0x41000000\n \
             |  | 0xa0000000/4  ->  0x42000000\n"
        );
        assert!(sample()
            .dump()
            .to_string()
            .starts_with("   0: 0x00000000  ->  0x5a000000\n"));
    }
}
