//! End-to-end tests for playgen
//!
//! Drives the orchestrator against a wiremock delivery server (HLS) and a
//! small in-process RTSP server on a random port.

use playgen::config::{Protocol, RunConfig, parse_session_records};
use playgen::orchestrator::{Orchestrator, RunReport};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Fixtures ──────────────────────────────────────────────────────────────────

const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:4
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\",DEFAULT=YES,URI=\"audio/en.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=2560000,AUDIO=\"aud\"
hi/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=640000,AUDIO=\"aud\"
lo/index.m3u8
";

fn media(prefix: &str, count: usize) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:1\n");
    for i in 0..count {
        out.push_str(&format!("#EXTINF:0.01,\n{prefix}{i}.ts\n"));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

async fn mount_get(server: &MockServer, p: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(p))
        .respond_with(response)
        .mount(server)
        .await;
}

fn quick_run(server_addr: String) -> RunConfig {
    RunConfig {
        server_addr,
        launch_interval: Duration::from_millis(20),
        play_duration: Duration::from_secs(60),
        ..Default::default()
    }
}

/// Serve RTSP on a random port: answer DESCRIBE/SETUP/PLAY, stream a few
/// interleaved packets, close after TEARDOWN. Returns the methods seen.
async fn start_rtsp_server() -> (SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        let mut methods = Vec::new();

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                break;
            }
            let method = line.split_whitespace().next().unwrap_or_default().to_string();

            let mut cseq = String::new();
            loop {
                let mut h = String::new();
                if reader.read_line(&mut h).await.unwrap_or(0) == 0 {
                    break;
                }
                let h = h.trim_end();
                if h.is_empty() {
                    break;
                }
                if let Some(v) = h.strip_prefix("CSeq: ") {
                    cseq = v.to_string();
                }
            }

            let extra = match method.as_str() {
                "SETUP" => "Session: 90210;timeout=60\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n",
                _ => "",
            };
            let reply = format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n{extra}\r\n");
            let socket = reader.get_mut();
            socket.write_all(reply.as_bytes()).await.unwrap();
            if method == "PLAY" {
                socket.write_all(&[0x24, 0, 0, 4, 1, 2, 3, 4]).await.unwrap();
            }

            let done = method == "TEARDOWN";
            methods.push(method);
            if done {
                break;
            }
        }
        methods
    });

    (addr, handle)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn hls_sessions_run_full_chain() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/command/demandOtu"))
        .and(body_partial_json(json!({
            "protocolType": "http",
            "streamingType": "static",
            "path": "movies"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resultCode": 200,
            "oneTimeUrl": [format!("{}/otu/xyz", server.uri())]
        })))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/otu/xyz"))
        .and(header("X-Client-User-Agent", "playgen"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/vod/a/master.m3u8"))
        .expect(2)
        .mount(&server)
        .await;

    mount_get(
        &server,
        "/vod/a/master.m3u8",
        ResponseTemplate::new(200).set_body_string(MASTER),
    )
    .await;
    mount_get(
        &server,
        "/vod/a/hi/index.m3u8",
        ResponseTemplate::new(200).set_body_string(media("v", 3)),
    )
    .await;
    mount_get(
        &server,
        "/vod/a/audio/en.m3u8",
        ResponseTemplate::new(200).set_body_string(media("a", 3)),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/vod/a/hi/v0.ts"))
        .and(header("User-Agent", "playgen"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1880]))
        .expect(2)
        .mount(&server)
        .await;
    mount_get(&server, "/vod/a/hi/v1.ts", ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1880])).await;
    mount_get(&server, "/vod/a/hi/v2.ts", ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1880])).await;
    for i in 0..3 {
        mount_get(
            &server,
            &format!("/vod/a/audio/a{i}.ts"),
            ResponseTemplate::new(200).set_body_bytes(vec![0u8; 376]),
        )
        .await;
    }

    let records = parse_session_records(
        "# two viewers of the same title\n\
         movies/a.mp4 127.0.0.1 svc1 vod H\n\
         movies/a.mp4 127.0.0.1 svc1 vod\n",
    )
    .unwrap();

    let report = Orchestrator::new(quick_run(server.address().to_string()), records)
        .unwrap()
        .run()
        .await;

    assert_eq!(
        report,
        RunReport {
            launched: 2,
            failed: 0
        }
    );

    let requests = server.received_requests().await.unwrap();
    let audio = requests
        .iter()
        .filter(|r| r.url.path().starts_with("/vod/a/audio/a"))
        .count();
    assert_eq!(audio, 6);
    assert!(
        requests
            .iter()
            .all(|r| !r.url.path().starts_with("/vod/a/lo/"))
    );
}

#[tokio::test]
async fn failed_sessions_are_counted_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/command/demandOtu"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let records = parse_session_records("a.mp4 127.0.0.1 svc vod H\n").unwrap();
    let run = RunConfig {
        session_count: Some(3),
        ..quick_run(server.address().to_string())
    };

    let report = Orchestrator::new(run, records).unwrap().run().await;
    assert_eq!(report.launched, 3);
    assert_eq!(report.failed, 3);
}

#[tokio::test]
async fn rtsp_session_plays_and_tears_down() {
    let (rtsp_addr, rtsp) = start_rtsp_server().await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/command/demandOtu"))
        .and(body_partial_json(json!({ "protocolType": "rtsp" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resultCode": 200,
            "oneTimeUrl": [format!("rtsp://{rtsp_addr}/a.mpg")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let records = parse_session_records("a.mpg 127.0.0.1 svc vod H\n").unwrap();
    let run = RunConfig {
        protocol: Protocol::Rtsp,
        play_duration: Duration::from_millis(1500),
        ..quick_run(server.address().to_string())
    };

    let report = Orchestrator::new(run, records).unwrap().run().await;
    assert_eq!(report.failed, 0);

    let methods = rtsp.await.unwrap();
    assert_eq!(methods, ["DESCRIBE", "SETUP", "PLAY", "TEARDOWN"]);
}
