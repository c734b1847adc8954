//! End-to-end exercise of the control socket: a real `TcpStream` client
//! drives a `GraphManager::run` loop through build/start/stop/quit, the
//! way an operator tool would over the wire (`spec.md` §5-§7).

use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use falcon::net::control::{read_frames, write_frames};
use falcon::{GlobalContext, GraphManager};

const SIMPLE_GRAPH: &str = r#"
reader1:
  class: Reader
  options:
    port: 0
    channelmap:
      grp1: [0, 1, 2, 3]
"#;

fn send(stream: &mut TcpStream, frames: &[&str]) -> Vec<String> {
    let frames: Vec<String> = frames.iter().map(|s| s.to_string()).collect();
    write_frames(stream, &frames).unwrap();
    read_frames(stream).unwrap()
}

fn connect(addr: &str) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr) {
            stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            return stream;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("could not connect to {addr}");
}

#[test]
fn drives_a_graph_through_build_start_stop_and_quit() {
    let dir = tempfile::tempdir().unwrap();
    let global = GlobalContext::new(dir.path().join("runs"), dir.path().join("resources"));
    let addr = "127.0.0.1:18881";

    let server = thread::spawn(move || {
        let mut manager = GraphManager::new(global);
        manager.run(addr).unwrap();
    });

    let mut stream = connect(addr);

    let reply = send(&mut stream, &["graph", "state"]);
    assert_eq!(reply, vec!["OK".to_string(), "EMPTY".to_string()]);

    let reply = send(&mut stream, &["graph", "build", SIMPLE_GRAPH]);
    assert_eq!(reply[0], "OK");

    let reply = send(&mut stream, &["graph", "state"]);
    assert_eq!(reply, vec!["OK".to_string(), "BUILT".to_string()]);

    let reply = send(&mut stream, &["graph", "yaml"]);
    assert_eq!(reply[0], "OK");
    assert!(reply[1].contains("reader1"));

    let reply = send(&mut stream, &["graph", "start"]);
    assert_eq!(reply[0], "OK");

    let reply = send(&mut stream, &["graph", "state"]);
    assert_eq!(reply, vec!["OK".to_string(), "PROCESSING".to_string()]);

    let reply = send(&mut stream, &["info"]);
    assert_eq!(reply[0], "OK");
    assert!(reply[1].contains("reader1"));

    let reply = send(&mut stream, &["graph", "stop"]);
    assert_eq!(reply[0], "OK");

    let reply = send(&mut stream, &["graph", "state"]);
    assert_eq!(reply, vec!["OK".to_string(), "BUILT".to_string()]);

    let reply = send(&mut stream, &["graph", "destroy"]);
    assert_eq!(reply[0], "OK");

    let reply = send(&mut stream, &["quit"]);
    assert_eq!(reply[0], "OK");

    server.join().unwrap();
}

#[test]
fn rejects_unknown_commands_without_closing_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let global = GlobalContext::new(dir.path().join("runs"), dir.path().join("resources"));
    let addr = "127.0.0.1:18882";

    let server = thread::spawn(move || {
        let mut manager = GraphManager::new(global);
        manager.run(addr).unwrap();
    });

    let mut stream = connect(addr);

    let reply = send(&mut stream, &["bogus"]);
    assert_eq!(reply[0], "ERR");

    let reply = send(&mut stream, &["graph", "state"]);
    assert_eq!(reply, vec!["OK".to_string(), "EMPTY".to_string()]);

    let reply = send(&mut stream, &["quit"]);
    assert_eq!(reply[0], "OK");

    server.join().unwrap();
}
