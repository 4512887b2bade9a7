//! Minimal HTTP/1.1 server answering HEAD requests with scripted status codes.
//!
//! Each path has a sequence of statuses; the last one repeats once the
//! sequence is used up. Unknown paths get 404.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
pub struct StatusServer {
    pub base: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl StatusServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    /// Number of requests received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

/// Starts a server in a background thread. It runs until the process exits.
pub fn start(routes: &[(&str, &[u16])]) -> StatusServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let routes: Arc<HashMap<String, Vec<u16>>> = Arc::new(
        routes
            .iter()
            .map(|(path, statuses)| (path.to_string(), statuses.to_vec()))
            .collect(),
    );
    let hits = Arc::new(Mutex::new(HashMap::new()));
    {
        let hits = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let routes = Arc::clone(&routes);
                let hits = Arc::clone(&hits);
                thread::spawn(move || handle(stream, &routes, &hits));
            }
        });
    }
    StatusServer {
        base: format!("http://127.0.0.1:{}/", port),
        hits,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    routes: &HashMap<String, Vec<u16>>,
    hits: &Mutex<HashMap<String, usize>>,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let seen = {
        let mut hits = hits.lock().unwrap();
        let count = hits.entry(path.clone()).or_insert(0);
        *count += 1;
        *count - 1
    };
    let status = routes
        .get(&path)
        .map(|statuses| statuses[seen.min(statuses.len() - 1)])
        .unwrap_or(404);

    let response = format!(
        "HTTP/1.1 {} Scripted\r\nContent-Type: text/plain\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status
    );
    let _ = stream.write_all(response.as_bytes());
}
