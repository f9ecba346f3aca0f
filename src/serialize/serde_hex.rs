//! (De)serialize address-like integers as `"0x..."` strings, formatted as a
//! full pointer-sized word (negative offsets wrap, like `%p`).

use std::{fmt, marker::PhantomData};

use serde::{de::Visitor, Deserializer, Serializer};

use crate::util::num::as_word;

pub trait AsWord: Copy {
    fn as_word(self) -> usize;
}

pub trait FromWord: Copy {
    fn from_word(value: usize) -> Self;
}

impl AsWord for isize {
    fn as_word(self) -> usize {
        as_word(self)
    }
}

impl FromWord for isize {
    fn from_word(value: usize) -> Self {
        value as isize
    }
}

/// `0x`-prefixed lowercase hex of `value`'s pointer-sized bit pattern.
pub fn format<T: AsWord>(value: T) -> String {
    format!("{:#x}", value.as_word())
}

pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsWord,
{
    serializer.serialize_str(&format(*value))
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromWord,
{
    struct V<Word>(PhantomData<Word>);

    impl<'de, Word> Visitor<'de> for V<Word>
    where
        Word: FromWord,
    {
        type Value = Word;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a 0x-prefixed hexadecimal word")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let digits = v
                .strip_prefix("0x")
                .ok_or_else(|| E::custom(format_args!("missing 0x prefix in {v:?}")))?;
            let value = usize::from_str_radix(digits, 16).map_err(E::custom)?;
            Ok(Self::Value::from_word(value))
        }
    }

    deserializer.deserialize_str(V::<T>(PhantomData))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Offset {
        #[serde(with = "crate::serialize::serde_hex")]
        value: isize,
    }

    #[test]
    fn negative_offsets_are_written_as_full_words() {
        assert_eq!(format(-0x10isize), format!("{:#x}", usize::MAX - 0xf));
        assert_eq!(format(0x1ebb80isize), "0x1ebb80");
    }

    #[test]
    fn hex_strings_survive_json() {
        let json = serde_json::to_string(&Offset { value: -0x2000 }).unwrap();
        let back: Offset = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, -0x2000);
    }

    #[test]
    fn bare_numbers_are_rejected() {
        assert!(serde_json::from_str::<Offset>(r#"{"value":"1234"}"#).is_err());
        assert!(serde_json::from_str::<Offset>(r#"{"value":1234}"#).is_err());
    }
}
