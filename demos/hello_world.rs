use hipshot::{Request, Response, Router, Server, StatusCode};

fn user(req: &mut Request<'_>, resp: Response) {
    let id = req.path_param("id").unwrap_or_default().to_owned();

    resp.header("Content-Type", "application/json")
        .body(format!(r#"{{"id": {id:?}}}"#))
        .send()
}

fn main() {
    env_logger::init();

    let router = Router::new()
        .get("/", |_, resp| {
            resp.status(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body("Hello, world!")
                .send()
        })
        .get("/users/{id}", user)
        .post("/echo", |req, resp| {
            let body = req.body().unwrap_or_default().to_vec();
            resp.body(body).send()
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
