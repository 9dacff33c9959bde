extern crate emvc;
extern crate env_logger;

use emvc::App;

fn main() {
    env_logger::init();

    let app = App::new();

    app.get("/test", |req, res, next| {
        res.status(200)
            .send(req.query_or("val", "testing 1, 2..."));
        next.ok();
    });

    app.get("/download-file/:[filename]", |req, res, next| {
        let filename = req.param_or("filename", "test.txt").to_string();
        res.status(200)
            .download("./assets/report.pdf", Some(filename.as_str()));
        next.ok();
    });

    app.get("/echo/:val", |req, res, next| {
        res.status(200).send(req.param_or("val", ""));
        next.ok();
    });

    app.listen("127.0.0.1:8080").expect("server failed");
}
