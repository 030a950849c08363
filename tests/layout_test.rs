/// Loading collections out of OCI image layout directories on disk
#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use uor_collection::config::LoaderConfig;
    use uor_collection::constants::{
        ANNOTATION_REF_NAME, ANNOTATION_TITLE, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST,
    };
    use uor_collection::oci::LayoutFetcher;
    use uor_collection::{Collection, Descriptor, ManifestLoader};

    fn write_blob(root: &Path, media_type: &str, data: &[u8]) -> Descriptor {
        let desc = Descriptor::for_bytes(media_type, data);
        let dir = root.join("blobs").join("sha256");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(desc.digest.hex()), data).unwrap();
        desc
    }

    fn write_json(root: &Path, media_type: &str, value: serde_json::Value) -> Descriptor {
        write_blob(root, media_type, &serde_json::to_vec(&value).unwrap())
    }

    /// Layout with one tagged index over two manifests of two files each
    fn build_layout(root: &Path) -> Vec<Descriptor> {
        let config = write_blob(root, "application/vnd.uor.config.v1+json", b"{}");

        let manifests: Vec<Descriptor> = ["amd64", "arm64"]
            .iter()
            .map(|arch| {
                let layers: Vec<Descriptor> = ["bin/tool", "README.md"]
                    .iter()
                    .map(|name| {
                        let data = format!("{}:{}", arch, name);
                        write_blob(root, "application/octet-stream", data.as_bytes())
                            .with_annotation(ANNOTATION_TITLE, *name)
                    })
                    .collect();
                write_json(
                    root,
                    MEDIA_TYPE_OCI_MANIFEST,
                    json!({
                        "schemaVersion": 2,
                        "mediaType": MEDIA_TYPE_OCI_MANIFEST,
                        "config": config,
                        "layers": layers,
                    }),
                )
            })
            .collect();

        let index = write_json(
            root,
            MEDIA_TYPE_OCI_INDEX,
            json!({
                "schemaVersion": 2,
                "mediaType": MEDIA_TYPE_OCI_INDEX,
                "manifests": manifests,
            }),
        )
        .with_annotation(ANNOTATION_REF_NAME, "latest");

        std::fs::write(
            root.join("index.json"),
            serde_json::to_vec(&json!({ "schemaVersion": 2, "manifests": [index] })).unwrap(),
        )
        .unwrap();
        std::fs::write(root.join("oci-layout"), r#"{"imageLayoutVersion": "1.0.0"}"#).unwrap();

        let mut all = vec![index, config];
        all.extend(manifests);
        all
    }

    #[tokio::test]
    async fn test_load_layout_by_tag() {
        let dir = TempDir::new().unwrap();
        let expected = build_layout(dir.path());

        let fetcher = LayoutFetcher::new(dir.path());
        let root = fetcher.resolve(Some("latest")).await.unwrap();
        assert_eq!(root.digest, expected[0].digest);

        let collection = Collection::new("layout");
        let stats = ManifestLoader::new(&fetcher)
            .with_config(LoaderConfig::default())
            .load(&CancellationToken::new(), &collection, &root)
            .await
            .unwrap();

        // index + config + 2 manifests + 4 files
        assert_eq!(collection.len(), 8);
        assert_eq!(stats.manifests_fetched, 3);
        for desc in &expected {
            assert!(collection.contains(&desc.digest), "missing {}", desc.digest);
        }

        let titles: Vec<String> = collection
            .nodes()
            .iter()
            .filter_map(|n| n.title().map(str::to_string))
            .collect();
        assert_eq!(titles.iter().filter(|t| t.as_str() == "README.md").count(), 2);
    }

    #[tokio::test]
    async fn test_corrupted_blob_fails_integrity() {
        let dir = TempDir::new().unwrap();
        let expected = build_layout(dir.path());
        let manifest = &expected[2];

        let path = dir
            .path()
            .join("blobs")
            .join("sha256")
            .join(manifest.digest.hex());
        std::fs::write(&path, b"{\"schemaVersion\": 2}").unwrap();

        let fetcher = LayoutFetcher::new(dir.path());
        let root = fetcher.resolve(None).await.unwrap();
        let collection = Collection::new("layout");
        let err = ManifestLoader::new(&fetcher)
            .with_config(LoaderConfig::sequential())
            .load(&CancellationToken::new(), &collection, &root)
            .await
            .unwrap_err();

        assert!(err.is_integrity());
        assert_eq!(err.digest(), &manifest.digest);
    }
}
