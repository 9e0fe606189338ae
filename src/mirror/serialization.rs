//! 序列化辅助：JSON 内嵌二进制的 base64 编解码、消息 ID 生成

use serde::{Deserialize, Serializer};

/// Base64 反序列化函数（支持 null 值）
pub fn deserialize_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use base64::Engine;
    // 先尝试反序列化为 Option<String>，以支持 null 值
    let opt_s: Option<String> = Deserialize::deserialize(deserializer)?;
    let s = match opt_s {
        Some(s) => s,
        None => return Ok(Vec::new()), // null 或缺失时返回空 Vec
    };
    if s.is_empty() {
        return Ok(Vec::new());
    }
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(serde::de::Error::custom)
}

/// Base64 序列化函数（与 `deserialize_base64` 配对）
pub fn serialize_base64<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    serializer.serialize_str(&encoded)
}

/// 生成消息 ID（发送合成路径使用，大写十六进制风格）
pub fn generate_msg_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize)]
    struct Payload {
        #[serde(
            serialize_with = "serialize_base64",
            deserialize_with = "deserialize_base64"
        )]
        raw: Vec<u8>,
    }

    #[test]
    fn test_base64_roundtrip() {
        let p = Payload {
            raw: vec![0x01, 0x02, 0xff],
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.raw, vec![0x01, 0x02, 0xff]);
    }

    #[test]
    fn test_base64_null_as_empty() {
        let back: Payload = serde_json::from_str(r#"{"raw":null}"#).unwrap();
        assert!(back.raw.is_empty());
    }

    #[test]
    fn test_generate_msg_id_unique() {
        let a = generate_msg_id();
        let b = generate_msg_id();
        assert_ne!(a, b);
        assert_eq!(a, a.to_uppercase());
    }
}
