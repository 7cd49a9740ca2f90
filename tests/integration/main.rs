//! Integration tests for galaxy-proxy

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn galaxy_proxy() -> Command {
        cargo_bin_cmd!("galaxy-proxy")
    }

    /// Config pointing storage into the temp dir and upstream at a closed port
    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join("config.toml");
        let storage = dir.join("data");
        let content = format!(
            r#"
[repository]
name = "test-repo"
url = "http://localhost:8081/repository/test-repo"
upstream_url = "http://127.0.0.1:9/"

[storage]
root = "{}"

[proxy]
timeout_secs = 5
"#,
            storage.display().to_string().replace('\\', "/")
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        galaxy_proxy()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Fetch-through cache for Ansible Galaxy"));
    }

    #[test]
    fn version_displays() {
        galaxy_proxy()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("galaxy-proxy"));
    }

    #[test]
    fn config_path_honors_flag() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path());
        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path());
        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[repository]"))
            .stdout(predicate::str::contains("test-repo"));
    }

    #[test]
    fn config_init_then_refuse_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(path.exists());

        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn config_init_force_repairs_broken_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[proxy\n").unwrap();

        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));

        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "init", "--force"])
            .assert()
            .success();

        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .success();
    }

    #[test]
    fn config_set_updates_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path());

        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "set", "proxy.metadata_max_age", "30"])
            .assert()
            .success();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("metadata_max_age = 30"));
    }

    #[test]
    fn config_set_unknown_key() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path());
        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "set", "proxy.nope", "x"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn config_set_rejects_bad_url() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path());
        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["config", "set", "repository.upstream_url", "galaxy.ansible.com"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid repository URL"));
    }

    #[test]
    fn list_empty_json() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path());
        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn list_components_empty_table() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path());
        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["list", "--components"])
            .assert()
            .success()
            .stderr(predicate::str::contains("No stored components"));
    }

    #[test]
    fn get_unrouted_path() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path());
        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["get", "/simple/requests/"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No route matches"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn get_with_unreachable_upstream() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path());
        galaxy_proxy()
            .arg("--config")
            .arg(&path)
            .args(["get", "/api/"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }
}

mod proxy_tests {
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use futures_util::future::join_all;
    use galaxy_proxy::content::Content;
    use galaxy_proxy::error::{ProxyError, ProxyResult};
    use galaxy_proxy::proxy::{
        CacheStatus, Conditions, FetchOutcome, MaxAge, ProxyCache, Upstream, UpstreamResponse,
    };
    use galaxy_proxy::repository::Repository;
    use galaxy_proxy::route::{GalaxyRoutes, Request};
    use galaxy_proxy::storage::{
        CacheInfo, FileBlobStore, MetadataEngine, MetadataStore, PackageIdentity,
        DEFAULT_HASH_ALGORITHMS,
    };
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::{NamedTempFile, TempDir};

    const UPSTREAM: &str = "https://galaxy.ansible.com/";
    const PROXY_URL: &str = "http://localhost:8081/repository/my-repo";

    #[derive(Clone)]
    enum Scripted {
        Body {
            content_type: &'static str,
            body: Vec<u8>,
            etag: Option<&'static str>,
        },
        NotModified,
        Missing,
        Fail,
    }

    /// Upstream answering from a script and recording every call
    struct MockUpstream {
        dir: PathBuf,
        script: Mutex<HashMap<String, Scripted>>,
        calls: Mutex<Vec<(String, Conditions)>>,
    }

    impl MockUpstream {
        fn new(dir: PathBuf) -> Arc<Self> {
            Arc::new(Self {
                dir,
                script: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn respond(&self, url: &str, response: Scripted) {
            self.script.lock().unwrap().insert(url.to_string(), response);
        }

        fn json(&self, url: &str, body: &str, etag: Option<&'static str>) {
            self.respond(
                url,
                Scripted::Body {
                    content_type: "application/json",
                    body: body.as_bytes().to_vec(),
                    etag,
                },
            );
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn last_conditions(&self) -> Conditions {
            self.calls.lock().unwrap().last().unwrap().1.clone()
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn fetch(&self, url: &str, conditions: &Conditions) -> ProxyResult<FetchOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), conditions.clone()));
            let scripted = self.script.lock().unwrap().get(url).cloned();

            match scripted {
                Some(Scripted::Body {
                    content_type,
                    body,
                    etag,
                }) => {
                    let mut file = NamedTempFile::new_in(&self.dir).unwrap();
                    file.write_all(&body).unwrap();
                    Ok(FetchOutcome::Fetched(UpstreamResponse {
                        body: file.into_temp_path(),
                        content_type: content_type.to_string(),
                        etag: etag.map(str::to_string),
                        last_modified: None,
                    }))
                }
                Some(Scripted::NotModified) => Ok(FetchOutcome::NotModified),
                Some(Scripted::Missing) | None => Ok(FetchOutcome::Missing),
                Some(Scripted::Fail) => Err(ProxyError::upstream(url, "connection reset")),
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        upstream: Arc<MockUpstream>,
        proxy: ProxyCache,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("upstream");
        std::fs::create_dir_all(&staging).unwrap();
        let upstream = MockUpstream::new(staging);

        let repository = Repository::new("my-repo", PROXY_URL, UPSTREAM, "https://github.com").unwrap();
        let blobs = Arc::new(FileBlobStore::new("default", dir.path().join("blobs")));
        let engine = MetadataEngine::new(dir.path().join("metadata"), blobs);
        let store = MetadataStore::new(engine, DEFAULT_HASH_ALGORITHMS.to_vec());
        let proxy = ProxyCache::new(repository, Arc::new(GalaxyRoutes), upstream.clone(), store);

        Fixture {
            _dir: dir,
            upstream,
            proxy,
        }
    }

    async fn get(proxy: &ProxyCache, uri: &str) -> (Content, CacheStatus) {
        proxy
            .get_with_status(&Request::parse(uri).unwrap())
            .await
            .unwrap()
            .unwrap()
    }

    async fn text(content: &Content) -> String {
        String::from_utf8(content.read_to_vec().await.unwrap()).unwrap()
    }

    /// Push the stored copy's last verification two days back
    async fn age(proxy: &ProxyCache, name: &str, validator: Option<&str>) {
        let old = CacheInfo::new(Utc::now() - Duration::days(2), validator.map(str::to_string));
        assert!(proxy
            .store()
            .set_cache_info(proxy.bucket(), name, old)
            .await
            .unwrap());
    }

    const VERSION_URI: &str = "/api/v3/collections/community/general/versions/8.1.0/";
    const VERSION_ASSET: &str = "collections/community/general/versions/8.1.0";

    fn version_url() -> String {
        format!("{}api/v3/collections/community/general/versions/8.1.0/", UPSTREAM)
    }

    const VERSION_BODY: &str = r#"{"namespace":"community","name":"general","version":"8.1.0","download_url":"https://galaxy.ansible.com/download/community-general-8.1.0.tar.gz"}"#;

    #[tokio::test]
    async fn second_request_is_a_hit_with_same_etag() {
        let f = fixture();
        f.upstream.json(&version_url(), VERSION_BODY, Some("\"v1\""));

        let (first, status) = get(&f.proxy, VERSION_URI).await;
        assert_eq!(status, CacheStatus::Miss);
        let (second, status) = get(&f.proxy, VERSION_URI).await;
        assert_eq!(status, CacheStatus::Hit);

        assert_eq!(f.upstream.call_count(), 1);
        assert!(first.etag().is_some());
        assert_eq!(first.etag(), second.etag());
        assert_eq!(second.attributes.asset_name.as_deref(), Some(VERSION_ASSET));

        let body = text(&second).await;
        assert!(body.contains(&format!("{}/download/community-general-8.1.0.tar.gz", PROXY_URL)));
        assert!(!body.contains(UPSTREAM));

        let components = f.proxy.store().list_components(f.proxy.bucket()).await.unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(
            components[0].identity,
            PackageIdentity::new("community", "general", "8.1.0")
        );
    }

    #[tokio::test]
    async fn internal_api_is_fetched_every_time_and_never_stored() {
        let f = fixture();
        f.upstream.json(
            &format!("{}api/", UPSTREAM),
            r#"{"current_version":"v1","available_versions":{"v1":"https://galaxy.ansible.com/api/v1/"}}"#,
            None,
        );

        let (first, status) = get(&f.proxy, "/api/").await;
        assert_eq!(status, CacheStatus::Live);
        let (_, status) = get(&f.proxy, "/api/").await;
        assert_eq!(status, CacheStatus::Live);

        assert_eq!(f.upstream.call_count(), 2);
        assert!(f.proxy.store().list_assets(f.proxy.bucket()).await.unwrap().is_empty());
        assert!(first.attributes.asset_name.is_none());
        assert!(text(&first).await.contains(&format!("{}/api/v1/", PROXY_URL)));
    }

    #[tokio::test]
    async fn paged_role_versions_are_rewritten_and_stored() {
        let f = fixture();
        f.upstream.json(
            &format!("{}api/v1/roles/42/versions/?page=1", UPSTREAM),
            r#"{"count":30,"next_link":"/api/v1/roles/42/versions/?page=2","results":[{"name":"6.1.0","download_url":"https://github.com/geerlingguy/ansible-role-docker/archive/6.1.0.tar.gz"}]}"#,
            None,
        );

        let (content, _) = get(&f.proxy, "/api/v1/roles/42/versions/?page=1").await;
        let json: serde_json::Value = serde_json::from_str(&text(&content).await).unwrap();

        assert_eq!(json["next_link"], "/repository/my-repo/api/v1/roles/42/versions/?page=2");
        assert_eq!(
            json["results"][0]["download_url"],
            format!(
                "{}/download/geerlingguy/ansible-role-docker/archive/6.1.0.tar.gz",
                PROXY_URL
            )
        );
        assert_eq!(
            content.attributes.asset_name.as_deref(),
            Some("roles/42/versions/page/1")
        );
    }

    #[tokio::test]
    async fn artifact_bytes_are_served_unchanged() {
        let f = fixture();
        let mut tarball: Vec<u8> = (0..=255u8).cycle().take(20_000).collect();
        tarball.extend_from_slice(UPSTREAM.as_bytes());
        f.upstream.respond(
            &format!("{}download/community-general-8.1.0.tar.gz", UPSTREAM),
            Scripted::Body {
                content_type: "application/gzip",
                body: tarball.clone(),
                etag: None,
            },
        );

        let (content, _) = get(&f.proxy, "/download/community-general-8.1.0.tar.gz").await;
        assert_eq!(content.read_to_vec().await.unwrap(), tarball);
        assert_eq!(content.size, tarball.len() as u64);
        assert_eq!(content.content_type, "application/gzip");

        let component = f
            .proxy
            .store()
            .load_component(
                f.proxy.bucket(),
                &PackageIdentity::new("community", "general", "8.1.0"),
            )
            .await
            .unwrap();
        assert!(component.is_some());
    }

    #[tokio::test]
    async fn artifact_and_metadata_share_one_component() {
        let f = fixture();
        f.upstream.json(&version_url(), VERSION_BODY, None);
        f.upstream.respond(
            &format!("{}download/community-general-8.1.0.tar.gz", UPSTREAM),
            Scripted::Body {
                content_type: "application/gzip",
                body: b"tarball".to_vec(),
                etag: None,
            },
        );

        get(&f.proxy, VERSION_URI).await;
        get(&f.proxy, "/download/community-general-8.1.0.tar.gz").await;

        let store = f.proxy.store();
        assert_eq!(store.list_components(f.proxy.bucket()).await.unwrap().len(), 1);
        let assets = store.list_assets(f.proxy.bucket()).await.unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].component, assets[1].component);
    }

    #[tokio::test]
    async fn concurrent_component_creation_yields_one_component() {
        let f = fixture();
        let identity = PackageIdentity::new("community", "general", "8.1.0");
        let store = f.proxy.store();

        let results = join_all((0..8).map(|_| store.ensure_component(f.proxy.bucket(), &identity))).await;
        let ids: Vec<_> = results.into_iter().map(|r| r.unwrap().id).collect();

        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.list_components(f.proxy.bucket()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_copy_is_served_when_upstream_fails() {
        let f = fixture();
        f.upstream.json(&version_url(), VERSION_BODY, None);
        let (first, _) = get(&f.proxy, VERSION_URI).await;

        age(&f.proxy, VERSION_ASSET, None).await;
        f.upstream.respond(&version_url(), Scripted::Fail);

        let (second, status) = get(&f.proxy, VERSION_URI).await;
        assert_eq!(status, CacheStatus::Stale);
        assert_eq!(text(&second).await, text(&first).await);
        assert_eq!(f.upstream.call_count(), 2);
    }

    #[tokio::test]
    async fn not_modified_revalidates_stored_copy() {
        let f = fixture();
        f.upstream.json(&version_url(), VERSION_BODY, Some("\"v1\""));
        let (first, _) = get(&f.proxy, VERSION_URI).await;

        age(&f.proxy, VERSION_ASSET, Some("\"v1\"")).await;
        f.upstream.respond(&version_url(), Scripted::NotModified);

        let before = Utc::now();
        let (second, status) = get(&f.proxy, VERSION_URI).await;
        assert_eq!(status, CacheStatus::Revalidated);
        assert_eq!(second.etag(), first.etag());
        assert_eq!(f.upstream.last_conditions().etag.as_deref(), Some("\"v1\""));

        let (_, status) = get(&f.proxy, VERSION_URI).await;
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(f.upstream.call_count(), 2);

        let assets = f.proxy.store().list_assets(f.proxy.bucket()).await.unwrap();
        let info = assets[0].cache_info.as_ref().unwrap();
        assert!(info.last_verified >= before);
        assert_eq!(info.validator.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn negative_max_age_never_goes_stale() {
        let f = fixture();
        let proxy = f.proxy.with_max_age(MaxAge {
            content: -1,
            metadata: -1,
        });
        f.upstream.json(&version_url(), VERSION_BODY, None);
        get(&proxy, VERSION_URI).await;

        age(&proxy, VERSION_ASSET, None).await;
        let (_, status) = get(&proxy, VERSION_URI).await;
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(f.upstream.call_count(), 1);
    }

    #[tokio::test]
    async fn upstream_missing_is_none() {
        let f = fixture();
        let served = f
            .proxy
            .get(&Request::parse("/api/v2/collections/nobody/nothing/versions/").unwrap())
            .await
            .unwrap();
        assert!(served.is_none());
        assert!(f.proxy.store().list_assets(f.proxy.bucket()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upstream_removal_is_none_even_with_stale_copy() {
        let f = fixture();
        f.upstream.json(&version_url(), VERSION_BODY, None);
        get(&f.proxy, VERSION_URI).await;

        age(&f.proxy, VERSION_ASSET, None).await;
        f.upstream.respond(&version_url(), Scripted::Missing);

        let served = f
            .proxy
            .get(&Request::parse(VERSION_URI).unwrap())
            .await
            .unwrap();
        assert!(served.is_none());
        assert_eq!(f.upstream.call_count(), 2);
    }

    #[tokio::test]
    async fn stored_content_survives_restart() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("upstream");
        std::fs::create_dir_all(&staging).unwrap();
        let upstream = MockUpstream::new(staging);
        upstream.json(&version_url(), VERSION_BODY, None);

        let build = |upstream: Arc<MockUpstream>| {
            let repository = Repository::new("my-repo", PROXY_URL, UPSTREAM, "https://github.com").unwrap();
            let blobs = Arc::new(FileBlobStore::new("default", dir.path().join("blobs")));
            let engine = MetadataEngine::new(dir.path().join("metadata"), blobs);
            let store = MetadataStore::new(engine, DEFAULT_HASH_ALGORITHMS.to_vec());
            ProxyCache::new(repository, Arc::new(GalaxyRoutes), upstream, store)
        };

        let (first, _) = get(&build(upstream.clone()), VERSION_URI).await;
        let (second, status) = get(&build(upstream.clone()), VERSION_URI).await;

        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(first.etag(), second.etag());
        assert_eq!(upstream.call_count(), 1);
    }
}
