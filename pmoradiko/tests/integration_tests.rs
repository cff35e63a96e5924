//! Integration tests for pmoradiko
//!
//! The radiko API is mocked with wiremock; the key extractor, the capture tool
//! and the decoder are small shell scripts.
#![cfg(unix)]

use chrono::{NaiveDate, NaiveDateTime};
use pmoradiko::recording::{AUDIO_FILE_NAME, METADATA_FILE_NAME};
use pmoradiko::{
    CapturePipeline, ConcatMerger, Converter, Error, FixedClock, PersistedProgram, Radiko,
    RadikoClient, RadikoRecorder, RetryPolicy, SessionState,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PLAYER: &[u8] = b"0123456789abcdef";

const SCHEDULE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<radiko>
  <stations>
    <station id="TEST1">
      <name>Test Radio</name>
      <scd>
        <progs>
          <date>20240101</date>
          <prog ft="20240101120000" to="20240101130000" ftl="1200" tol="1300" dur="3600">
            <title>Morning Show</title>
            <pfm>Host B</pfm>
            <desc>Talk &amp; music</desc>
          </prog>
        </progs>
      </scd>
    </station>
    <station id="TEST2">
      <name>Other Radio</name>
      <scd><progs><date>20240101</date></progs></scd>
    </station>
  </stations>
</radiko>"#;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// `swfextract -b 12 <bundle> -o <out>` stand-in: the whole bundle is the key
fn entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

fn fake_extractor(dir: &Path) -> PathBuf {
    script(dir, "swfextract", r#"cp "$3" "$5""#)
}

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

async fn mount_player(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/player.swf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PLAYER))
        .mount(server)
        .await;
}

async fn mount_auth1(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/api/auth1_fms"))
        .and(header("pragma", "no-cache"))
        .and(header("X-Radiko-App", "pc_ts"))
        .and(header("X-Radiko-App-Version", "4.0.0"))
        .and(header("X-Radiko-User", "test-stream"))
        .and(header("X-Radiko-Device", "pc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Radiko-Authtoken", "tok123")
                .insert_header("X-Radiko-Keylength", "6")
                .insert_header("X-Radiko-Keyoffset", "4"),
        )
        .mount(server)
        .await;
}

async fn mount_auth2(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/v2/api/auth2_fms"))
        .and(header("X-Radiko-Authtoken", "tok123"))
        // base64("456789")
        .and(header("X-Radiko-Partialkey", "NDU2Nzg5"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_schedule(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v2/api/program/today"))
        .and(query_param("area_id", "JP13"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SCHEDULE))
        .mount(server)
        .await;
}

/// A mock provider answering the whole handshake and the schedule for JP13
async fn provider() -> MockServer {
    let server = MockServer::start().await;
    mount_player(&server).await;
    mount_auth1(&server).await;
    mount_auth2(&server, "JP13,tokyo Japan,Tokyo\r\n").await;
    mount_schedule(&server).await;
    server
}

async fn client(server: &MockServer, tools: &Path) -> RadikoClient {
    RadikoClient::builder()
        .api_base(server.uri())
        .player_url(format!("{}/player.swf", server.uri()))
        .extractor(fake_extractor(tools))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_authenticate() {
    let tools = TempDir::new().unwrap();
    let server = provider().await;
    let client = client(&server, tools.path()).await;

    let (token, region) = client.authenticate(&CancellationToken::new()).await.unwrap();

    assert_eq!(token.as_str(), "tok123");
    assert_eq!(region.as_str(), "JP13");
}

#[tokio::test]
async fn test_authenticate_rejects_short_region_record() {
    let tools = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_player(&server).await;
    mount_auth1(&server).await;
    mount_auth2(&server, "OUT\r\n").await;
    let client = client(&server, tools.path()).await;

    let result = client.authenticate(&CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::Protocol(ref msg)) if msg == "failed to auth"));
}

#[tokio::test]
async fn test_authenticate_requires_challenge_headers() {
    let tools = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_player(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/api/auth1_fms"))
        .respond_with(ResponseTemplate::new(200).insert_header("X-Radiko-Authtoken", "tok123"))
        .mount(&server)
        .await;
    let client = client(&server, tools.path()).await;

    let result = client.authenticate(&CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::Protocol(ref msg)) if msg.contains("X-Radiko-Keylength")));
}

#[tokio::test]
async fn test_authenticate_reports_failing_stage() {
    let tools = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_player(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/api/auth1_fms"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let client = client(&server, tools.path()).await;

    let result = client.authenticate(&CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(Error::HttpStatus { stage: "auth1", status: 403, .. })
    ));
}

#[tokio::test]
async fn test_authenticate_with_failing_extractor() {
    let tools = TempDir::new().unwrap();
    let server = provider().await;
    let scratch = TempDir::new().unwrap();
    let extractor = script(tools.path(), "broken-swfextract", "echo 'bad swf' >&2; exit 2");
    let client = RadikoClient::builder()
        .api_base(server.uri())
        .player_url(format!("{}/player.swf", server.uri()))
        .extractor(extractor)
        .temp_dir(scratch.path())
        .build()
        .await
        .unwrap();

    let result = client.authenticate(&CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::Extraction(ref msg)) if msg.contains("bad swf")));
    assert_eq!(entries(scratch.path()), Vec::<PathBuf>::new());
}

#[tokio::test]
async fn test_handshake_leaves_no_scratch_files() {
    let tools = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let nested = scratch.path().join("handshake");

    // Rejected at auth2, after both scratch files were written
    let rejecting = MockServer::start().await;
    mount_player(&rejecting).await;
    mount_auth1(&rejecting).await;
    mount_auth2(&rejecting, "OUT\r\n").await;
    let client = RadikoClient::builder()
        .api_base(rejecting.uri())
        .player_url(format!("{}/player.swf", rejecting.uri()))
        .extractor(fake_extractor(tools.path()))
        .temp_dir(&nested)
        .build()
        .await
        .unwrap();
    let result = client.authenticate(&CancellationToken::new()).await;
    assert!(matches!(result, Err(Error::Protocol(_))));
    assert_eq!(entries(&nested), Vec::<PathBuf>::new());

    let server = provider().await;
    let client = RadikoClient::builder()
        .api_base(server.uri())
        .player_url(format!("{}/player.swf", server.uri()))
        .extractor(fake_extractor(tools.path()))
        .temp_dir(&nested)
        .build()
        .await
        .unwrap();
    let (_, region) = client.authenticate(&CancellationToken::new()).await.unwrap();
    assert_eq!(region.as_str(), "JP13");
    assert_eq!(entries(&nested), Vec::<PathBuf>::new());
}

#[tokio::test]
async fn test_authenticate_is_cancellable() {
    let tools = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/player.swf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(PLAYER)
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&server)
        .await;
    let client = client(&server, tools.path()).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = client.authenticate(&cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_program_lookup() {
    let tools = TempDir::new().unwrap();
    let server = provider().await;
    let client = client(&server, tools.path()).await;
    let cancel = CancellationToken::new();

    let (_, region) = client.authenticate(&cancel).await.unwrap();
    let program = client
        .current_program(&cancel, &region, "TEST1", at(12, 30))
        .await
        .unwrap();
    assert_eq!(program.title, "Morning Show");
    assert_eq!(program.pfm, "Host B");

    let missing = client
        .current_program(&cancel, &region, "TEST1", at(13, 0))
        .await;
    assert!(matches!(missing, Err(Error::NotFound(_))));

    let stations = client.station_list(&cancel).await.unwrap();
    assert_eq!(stations, vec!["TEST1", "TEST2"]);
}

/// Capture tool that logs its arguments and emits a few bytes
fn fake_rtmpdump(dir: &Path, args_log: &Path) -> PathBuf {
    script(
        dir,
        "rtmpdump",
        &format!(
            r#"printf '%s\n' "$@" > '{}'; printf 'radiko-audio'"#,
            args_log.display()
        ),
    )
}

/// Decoder writing its stdin, or the concat inputs, into the last argument
fn fake_ffmpeg(dir: &Path) -> Converter {
    let path = script(
        dir,
        "ffmpeg",
        r#"for last; do :; done
case "$3" in
  concat:*) inputs=${3#concat:}; IFS='|'; for f in $inputs; do cat "$f"; done > "$last" ;;
  *) cat > "$last" ;;
esac"#,
    );
    Converter::Ffmpeg(path)
}

#[tokio::test]
async fn test_records_and_saves_the_program_on_air() {
    let tools = TempDir::new().unwrap();
    let temp = TempDir::new().unwrap();
    let podcasts = TempDir::new().unwrap();
    let server = provider().await;

    let args_log = tools.path().join("rtmpdump.args");
    let converter = fake_ffmpeg(tools.path());
    let pipeline = CapturePipeline::new(converter.clone())
        .with_capture_tool(fake_rtmpdump(tools.path(), &args_log))
        .with_player_url(format!("{}/player.swf", server.uri()));
    let recorder = RadikoRecorder::new(client(&server, tools.path()).await, pipeline, "TEST1")
        .with_buffer_secs(60)
        .with_clock(Arc::new(FixedClock(at(12, 30))));
    let merger = ConcatMerger::new(converter, temp.path());

    let mut radiko = Radiko::new(Arc::new(recorder), Arc::new(merger), temp.path());
    let recording = radiko.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(radiko.state(), SessionState::Success);
    assert_eq!(recording.program.title, "Morning Show");
    assert_eq!(recording.station, "TEST1");
    assert_eq!(recording.audio_path, temp.path().join("radiko_0.m4a"));

    let args: Vec<String> = std::fs::read_to_string(&args_log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    let after = |flag: &str| {
        let i = args.iter().position(|a| a == flag).unwrap();
        args[i + 1].clone()
    };
    // 1800 s left in the program plus the 60 s buffer
    assert_eq!(after("--stop"), "1860");
    assert_eq!(after("--app"), "TEST1/_definst_");
    assert_eq!(after("-r"), "rtmpe://f-radiko.smartstream.ne.jp");
    assert!(args.contains(&"S:tok123".to_string()));

    let saved = recording.save(podcasts.path()).await.unwrap();
    assert_eq!(saved.directory, podcasts.path().join("20240101120000_TEST1"));
    assert_eq!(saved.audio_path, saved.directory.join(AUDIO_FILE_NAME));
    assert_eq!(saved.metadata_path, saved.directory.join(METADATA_FILE_NAME));
    assert_eq!(std::fs::read_to_string(&saved.audio_path).unwrap(), "radiko-audio");

    let loaded = PersistedProgram::load(&saved.directory).await.unwrap();
    assert_eq!(loaded.program.title, "Morning Show");
    assert_eq!(loaded.program.ft, "20240101120000");
    assert_eq!(loaded.program.to, "20240101130000");
    assert_eq!(loaded.program.pfm, "Host B");
    assert_eq!(loaded.program.desc, "Talk & music");
}

#[tokio::test]
async fn test_retried_segments_are_merged() {
    let tools = TempDir::new().unwrap();
    let temp = TempDir::new().unwrap();
    let server = provider().await;

    // first run emits a partial segment and fails, the second one succeeds
    let marker = tools.path().join("failed-once");
    let rtmpdump = script(
        tools.path(),
        "rtmpdump",
        &format!(
            r#"if [ -e '{m}' ]; then printf 'second'; else touch '{m}'; printf 'first'; exit 1; fi"#,
            m = marker.display()
        ),
    );
    let converter = fake_ffmpeg(tools.path());
    let pipeline = CapturePipeline::new(converter.clone()).with_capture_tool(rtmpdump);
    let recorder = RadikoRecorder::new(client(&server, tools.path()).await, pipeline, "TEST1")
        .with_clock(Arc::new(FixedClock(at(12, 30))));
    let merger = ConcatMerger::new(converter, temp.path());
    let policy = RetryPolicy {
        backoff: Duration::from_millis(10),
        ..Default::default()
    };

    let mut radiko =
        Radiko::new(Arc::new(recorder), Arc::new(merger), temp.path()).with_policy(policy);
    let recording = radiko.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(radiko.state(), SessionState::Success);
    assert_eq!(recording.audio_path, temp.path().join("radiko_concat.m4a"));
    assert_eq!(std::fs::read_to_string(&recording.audio_path).unwrap(), "firstsecond");
    // segments stay on disk
    assert!(temp.path().join("radiko_0.m4a").exists());
    assert!(temp.path().join("radiko_1.m4a").exists());
}

#[tokio::test]
async fn test_nothing_on_air_aborts_the_session() {
    let tools = TempDir::new().unwrap();
    let temp = TempDir::new().unwrap();
    let server = provider().await;

    let args_log = tools.path().join("rtmpdump.args");
    let converter = fake_ffmpeg(tools.path());
    let pipeline = CapturePipeline::new(converter.clone())
        .with_capture_tool(fake_rtmpdump(tools.path(), &args_log));
    let recorder = RadikoRecorder::new(client(&server, tools.path()).await, pipeline, "TEST1")
        .with_clock(Arc::new(FixedClock(at(14, 0))));
    let merger = ConcatMerger::new(converter, temp.path());

    let mut radiko = Radiko::new(Arc::new(recorder), Arc::new(merger), temp.path());
    let result = radiko.run(&CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::EmptyOutputs(_))));
    assert_eq!(radiko.state(), SessionState::Aborted);
    assert!(!args_log.exists());
}
