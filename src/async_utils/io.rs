//! I/O utilities.

use tokio::io::AsyncReadExt as _;

use crate::prelude::*;

/// Read TOML or JSON from a file, choosing the format by extension.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open file at path: {:?}", path))?;
    let mut data = String::new();
    // Read all at once because our parsing libraries don't do async I/O.
    file.read_to_string(&mut data)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// Read an entire file, or standard input if `path` is `-`.
pub async fn read_path_or_stdin(path: &Path) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    if path == Path::new("-") {
        tokio::io::stdin()
            .read_to_end(&mut data)
            .await
            .context("Failed to read standard input")?;
    } else {
        data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    #[tokio::test]
    async fn reads_toml_and_json_by_extension() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("io-test")?;

        let toml_path = dir.path().join("sample.toml");
        std::fs::File::create(&toml_path)?.write_all(b"name = \"toml\"\n")?;
        let sample: Sample = read_json_or_toml(&toml_path).await?;
        assert_eq!(sample.name, "toml");

        let json_path = dir.path().join("sample.json");
        std::fs::File::create(&json_path)?.write_all(br#"{"name": "json"}"#)?;
        let sample: Sample = read_json_or_toml(&json_path).await?;
        assert_eq!(sample.name, "json");
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let result = read_path_or_stdin(Path::new("/nonexistent/upload.png")).await;
        assert!(result.is_err());
    }
}
