use hipshot::{Body, ChunkConsumer, Request, Response, Router, Server};
use std::{thread, time::Duration};

// Counts the bytes of a chunked upload and answers once it ends
struct Upload {
    received: usize,
    resp: Option<Response>,
}

impl ChunkConsumer for Upload {
    fn on_chunk(&mut self, chunk: &[u8]) {
        self.received += chunk.len();
    }

    fn on_end(&mut self) {
        if let Some(resp) = self.resp.take() {
            resp.body(format!("received {} bytes", self.received)).send();
        }
    }
}

fn upload(req: &mut Request<'_>, resp: Response) {
    match req.body_kind() {
        Body::Chunked => req.on_chunk(Upload {
            received: 0,
            resp: Some(resp),
        }),
        Body::Full(body) => resp.body(format!("received {} bytes", body.len())).send(),
        Body::Empty => resp.body("received 0 bytes").send(),
    }
}

fn main() {
    env_logger::init();

    let router = Router::new().post("/upload", upload).get("/later", |_, resp| {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            resp.body("answered from another thread").send();
        });
    });

    Server::builder()
        .host("127.0.0.1")
        .port(8080)
        .handler(router)
        .build()
        .start()
        .unwrap()
        .join()
        .unwrap();
}
