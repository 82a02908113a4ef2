use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{Rgba, RgbaImage};

use drawtask::api::HttpExperimentApi;
use drawtask::canvas::png_data_url;
use drawtask::session::{NetworkSession, SessionPage};
use drawtask::stimulus::{DrawingResponse, Stimulus};

/// Request line and body of one request the server saw.
#[derive(Debug)]
struct Seen {
    request_line: String,
    content_type: Option<String>,
    body: String,
}

fn read_request(stream: &mut TcpStream) -> Seen {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).expect("read request");
        assert!(n > 0, "connection closed before the headers ended");
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let header = |name: &str| {
        head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.trim().eq_ignore_ascii_case(name).then(|| v.trim().to_string())
        })
    };
    let length: usize = header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while data.len() < header_end + length {
        let n = stream.read(&mut buf).expect("read body");
        assert!(n > 0, "connection closed before the body ended");
        data.extend_from_slice(&buf[..n]);
    }
    Seen {
        request_line: head.lines().next().unwrap_or_default().to_string(),
        content_type: header("content-type"),
        body: String::from_utf8_lossy(&data[header_end..header_end + length]).to_string(),
    }
}

/// Answer one connection per canned `(status, body)` pair, in order.
fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind server");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().expect("accept");
            seen.push(read_request(&mut stream));
            let reason = if status == 200 { "OK" } else { "Error" };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).expect("write response");
        }
        seen
    });
    (format!("http://{}/", addr), handle)
}

fn stimuli_json() -> String {
    let stimuli: Vec<Stimulus> = ["k", "q"]
        .iter()
        .map(|name| Stimulus {
            name: format!("{}.png", name),
            image: png_data_url(&RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]))).unwrap(),
            drawing: String::new(),
        })
        .collect();
    serde_json::to_string(&stimuli).unwrap()
}

fn session(base: &str, participant: &str) -> NetworkSession<HttpExperimentApi> {
    NetworkSession::new(HttpExperimentApi::new(base).unwrap(), participant)
        .with_render_delay(Duration::ZERO)
}

#[test]
fn create_fetch_submit_over_http() {
    let infos = serde_json::json!({
        "status": "success",
        "infos": [{"contents": stimuli_json()}],
    });
    let (base, server) = serve(vec![
        (200, r#"{"status":"success","node":{"id":4}}"#.to_string()),
        (200, infos.to_string()),
        (200, r#"{"status":"success"}"#.to_string()),
        (403, r#"{"status":"error","html":"<p>All done, thank you</p>"}"#.to_string()),
    ]);

    let mut s = session(&base, "p-1");
    s.create_agent().unwrap();
    assert_eq!(s.node_id(), Some(4));
    assert_eq!(s.canvases().len(), 2);

    let c = &mut s.canvases_mut()[0];
    c.begin_stroke(20.0, 20.0);
    c.extend_stroke(60.0, 30.0);
    c.end_stroke();

    assert!(s.submit_response().is_err());
    assert_eq!(s.submitted(), 1);
    assert_eq!(s.page(), &SessionPage::Replaced("<p>All done, thank you</p>".into()));
    assert!(!s.exit_allowed());

    let seen = server.join().unwrap();
    let lines: Vec<&str> = seen.iter().map(|r| r.request_line.as_str()).collect();
    assert_eq!(
        lines,
        vec![
            "POST /node/p-1 HTTP/1.1",
            "GET /node/4/received_infos HTTP/1.1",
            "POST /info/4 HTTP/1.1",
            "POST /node/p-1 HTTP/1.1",
        ]
    );

    let post = &seen[2];
    assert_eq!(
        post.content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    let fields: Vec<(String, String)> = url::form_urlencoded::parse(post.body.as_bytes())
        .into_owned()
        .collect();
    let field = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap()
    };
    assert_eq!(field("info_type"), "Info");
    let responses: Vec<DrawingResponse> = serde_json::from_str(&field("contents")).unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].name, "k.png");
    assert_ne!(responses[0].drawing, "[]");
    assert_eq!(responses[1].name, "q.png");
    assert_eq!(responses[1].drawing, "[]");
}

#[test]
fn participant_id_is_sent_as_one_path_segment() {
    let (base, server) = serve(vec![(500, "Internal Server Error".to_string())]);

    let mut s = session(&base, "a/b?c");
    assert!(s.create_agent().is_err());
    // a non-JSON error body carries no page, so the session ends
    assert!(s.exit_allowed());
    assert_eq!(s.page(), &SessionPage::Questionnaire);

    let seen = server.join().unwrap();
    assert_eq!(seen[0].request_line, "POST /node/a%2Fb%3Fc HTTP/1.1");
}
