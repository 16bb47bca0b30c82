// Save request construction for the save command
//
// Reads the project files from disk and builds the JSON body the server
// expects. Thumbnails are sent as base64 data URLs.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use snapcloud_storage::encode_data_url;

/// Media document sent when no assets file is given.
pub const EMPTY_MEDIA: &str = "<media></media>";

/// Inputs of one save.
pub struct SaveArgs {
    pub document: PathBuf,
    pub assets: Option<PathBuf>,
    pub thumbnail: Option<PathBuf>,
    pub notes: Option<String>,
    pub public: bool,
    pub published: bool,
    pub remix_of: Option<String>,
}

/// Builds the save request body.
pub fn save_body(args: &SaveArgs) -> Result<Value> {
    let document = read_text(&args.document)?;
    let assets = match &args.assets {
        Some(path) => read_text(path)?,
        None => EMPTY_MEDIA.to_string(),
    };
    let thumbnail = match &args.thumbnail {
        Some(path) => {
            let bytes = std::fs::read(path)
                .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))?;
            Some(encode_data_url("image/png", &bytes))
        }
        None => None,
    };
    let remix_of = args
        .remix_of
        .as_deref()
        .map(parse_project_ref)
        .transpose()?
        .map(|(owner, name)| json!({ "owner": owner, "name": name }));

    Ok(json!({
        "document": document,
        "assets": assets,
        "thumbnail": thumbnail,
        "notes": args.notes,
        "isPublic": args.public,
        "isPublished": args.published,
        "remixOf": remix_of,
    }))
}

/// Splits `OWNER/NAME` at the first slash. Names may contain slashes.
pub fn parse_project_ref(value: &str) -> Result<(String, String)> {
    match value.split_once('/') {
        Some((owner, name)) if !owner.trim().is_empty() && !name.trim().is_empty() => {
            Ok((owner.trim().to_string(), name.to_string()))
        }
        _ => Err(anyhow!(
            "Invalid project reference: '{}'. Expected 'OWNER/NAME'",
            value
        )),
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(dir: &TempDir) -> SaveArgs {
        let document = dir.path().join("project.xml");
        std::fs::write(&document, "<project name=\"pong\"/>").unwrap();
        SaveArgs {
            document,
            assets: None,
            thumbnail: None,
            notes: None,
            public: false,
            published: false,
            remix_of: None,
        }
    }

    #[test]
    fn test_minimal_save_body() {
        let dir = TempDir::new().unwrap();
        let body = save_body(&args(&dir)).unwrap();

        assert_eq!(body["document"], "<project name=\"pong\"/>");
        assert_eq!(body["assets"], EMPTY_MEDIA);
        assert!(body["thumbnail"].is_null());
        assert!(body["remixOf"].is_null());
        assert_eq!(body["isPublic"], false);
    }

    #[test]
    fn test_full_save_body() {
        let dir = TempDir::new().unwrap();
        let assets = dir.path().join("media.xml");
        let thumbnail = dir.path().join("thumb.png");
        std::fs::write(&assets, "<media><costume/></media>").unwrap();
        std::fs::write(&thumbnail, [0u8, 1, 2]).unwrap();

        let body = save_body(&SaveArgs {
            assets: Some(assets),
            thumbnail: Some(thumbnail),
            notes: Some("arrow keys".to_string()),
            public: true,
            published: true,
            remix_of: Some("bob/pong".to_string()),
            ..args(&dir)
        })
        .unwrap();

        assert_eq!(body["assets"], "<media><costume/></media>");
        assert_eq!(body["thumbnail"], "data:image/png;base64,AAEC");
        assert_eq!(body["notes"], "arrow keys");
        assert_eq!(body["isPublished"], true);
        assert_eq!(body["remixOf"]["owner"], "bob");
        assert_eq!(body["remixOf"]["name"], "pong");
    }

    #[test]
    fn test_missing_document_fails() {
        let dir = TempDir::new().unwrap();
        let result = save_body(&SaveArgs {
            document: dir.path().join("missing.xml"),
            ..args(&dir)
        });
        assert!(result.unwrap_err().to_string().contains("Failed to read"));
    }

    #[test]
    fn test_parse_project_ref() {
        assert_eq!(
            parse_project_ref("bob/pong").unwrap(),
            ("bob".to_string(), "pong".to_string())
        );
        assert_eq!(
            parse_project_ref("bob/pong/v2").unwrap(),
            ("bob".to_string(), "pong/v2".to_string())
        );
        assert!(parse_project_ref("pong").is_err());
        assert!(parse_project_ref("/pong").is_err());
        assert!(parse_project_ref("bob/").is_err());
    }
}
