//! End-to-end exercises of the dispatch pipeline over an in-memory
//! stream: raw request bytes in, raw response bytes out, with the
//! reactor replaced by manual event and timer driving.

extern crate emvc;

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use emvc::{Cookie, DataValue, FilterPolicy, FilterRuleCtx, HandlerError,
           Method, PolicyCb, Router, UseWhen};

use common::{dechunk, split_response, Harness};

#[test]
fn echo_route_with_param() {
    let root = Router::new("/");
    root.get("/echo/:val", |req, res, next| {
        res.status(200).send(req.param_or("val", ""));
        next.ok();
    });
    let h = Harness::new(root);
    h.push(b"GET /echo/hello HTTP/1.1\r\nHost: test\r\n\r\n");

    let (head, body) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "head: {}", head);
    assert!(head.contains("Content-Type: text/plain; charset=utf-8"));
    assert!(head.contains("Content-Length: 5"));
    assert!(head.contains("Connection: keep-alive"));
    assert_eq!(body, b"hello");
    assert!(!h.closed());
}

#[test]
fn query_params_with_default() {
    let root = Router::new("/");
    root.get("/test", |req, res, next| {
        res.send(req.query_or("val", "default"));
        next.ok();
    });

    let h = Harness::new(root.clone());
    h.push(b"GET /test?val=xyz HTTP/1.1\r\nHost: t\r\n\r\n");
    let (_, body) = split_response(&h.take_output());
    assert_eq!(body, b"xyz");

    let h = Harness::new(root);
    h.push(b"GET /test HTTP/1.1\r\nHost: t\r\n\r\n");
    let (_, body) = split_response(&h.take_output());
    assert_eq!(body, b"default");
}

#[test]
fn request_body_is_buffered() {
    let root = Router::new("/");
    root.post("/submit", |req, res, next| {
        res.send(req.body_str().as_ref());
        next.ok();
    });
    let h = Harness::new(root);
    h.push(
        b"POST /submit HTTP/1.1\r\nHost: t\r\n\
          Content-Length: 11\r\n\r\nhello world",
    );
    let (_, body) = split_response(&h.take_output());
    assert_eq!(body, b"hello world");
}

#[test]
fn chunked_request_body_is_reassembled() {
    let root = Router::new("/");
    root.post("/submit", |req, res, next| {
        res.send(req.body_str().as_ref());
        next.ok();
    });
    let h = Harness::new(root);
    h.push(
        b"POST /submit HTTP/1.1\r\nHost: t\r\n\
          Transfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
    );
    let (_, body) = split_response(&h.take_output());
    assert_eq!(body, b"hello world");
}

#[test]
fn route_miss_renders_404_through_post_handlers() {
    let seen: Rc<RefCell<Option<(bool, u16, Option<DataValue>)>>> =
        Rc::new(RefCell::new(None));
    let root = Router::new("/");
    {
        let seen = seen.clone();
        root.use_when(UseWhen::After, move |_req, res, next| {
            *seen.borrow_mut() = Some((
                res.has_error(),
                res.get_error_status(),
                res.get_data("_err_status"),
            ));
            next.ok();
        });
    }
    let h = Harness::new(root);
    h.push(b"GET /no/such/route HTTP/1.1\r\nHost: t\r\n\r\n");

    let (head, body) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("404 Not Found"));
    let seen = seen.borrow().clone().expect("post handler did not run");
    assert!(seen.0, "post handler saw no error");
    assert_eq!(seen.1, 404);
    assert_eq!(seen.2, Some(DataValue::Int(404)));
}

#[test]
fn post_handler_can_render_the_error_itself() {
    let root = Router::new("/");
    root.use_when(UseWhen::After, |_req, res, next| {
        if res.has_error() && !res.started() {
            res.status(res.get_error_status()).send("custom page");
        }
        next.ok();
    });
    let h = Harness::new(root);
    h.push(b"GET /missing HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, body) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 404"));
    assert_eq!(body, b"custom page");
}

#[test]
fn handler_error_becomes_500_with_message() {
    let root = Router::new("/");
    root.get("/boom", |_req, _res, next| {
        next.fail("something broke");
    });
    let h = Harness::new(root);
    h.push(b"GET /boom HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, body) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("something broke"));
}

#[test]
fn policy_denial_is_403_by_default() {
    let root = Router::new("/");
    root.register_policy(FilterPolicy::access(|_ctx, cb| {
        cb.deny("members only");
    }));
    root.get("/inside", |_req, res, next| {
        res.send("secret");
        next.ok();
    });
    let h = Harness::new(root);
    h.push(b"GET /inside HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, body) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    let body = String::from_utf8_lossy(&body).into_owned();
    assert!(body.contains("members only"));
    assert!(!body.contains("secret"));
}

#[test]
fn policy_status_hint_overrides_the_default() {
    let root = Router::new("/");
    root.register_route_policy(
        Method::Get,
        "/teapot",
        FilterPolicy::access(|_ctx, cb| {
            cb.deny(HandlerError::new("short and stout")
                .with_status(418));
        }),
    );
    root.get("/teapot", |_req, res, next| {
        res.send("coffee");
        next.ok();
    });
    let h = Harness::new(root);
    h.push(b"GET /teapot HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, _) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 418"), "head: {}", head);
}

#[test]
fn pre_and_post_handlers_run_root_to_leaf() {
    let order: Rc<RefCell<Vec<&'static str>>> =
        Rc::new(RefCell::new(Vec::new()));
    let root = Router::new("/");
    let sub = Router::new("/sub");
    for (router, pre, post) in &[
        (&root, "root-pre", "root-post"),
        (&sub, "sub-pre", "sub-post"),
    ] {
        let o = order.clone();
        let name = *pre;
        router.use_when(UseWhen::Before, move |_rq, _rs, next| {
            o.borrow_mut().push(name);
            next.ok();
        });
        let o = order.clone();
        let name = *post;
        router.use_when(UseWhen::After, move |_rq, _rs, next| {
            o.borrow_mut().push(name);
            next.ok();
        });
    }
    {
        let o = order.clone();
        sub.get("/x", move |_req, res, next| {
            o.borrow_mut().push("handler");
            res.send("done");
            next.ok();
        });
    }
    root.register_router(sub);

    let h = Harness::new(root);
    h.push(b"GET /sub/x HTTP/1.1\r\nHost: t\r\n\r\n");
    assert_eq!(
        *order.borrow(),
        ["root-pre", "sub-pre", "handler", "root-post", "sub-post"]
    );
}

#[test]
fn pre_handler_starting_the_response_skips_the_route() {
    let ran: Rc<RefCell<bool>> = Rc::new(RefCell::new(false));
    let root = Router::new("/");
    root.use_when(UseWhen::Before, |_req, res, next| {
        res.send("intercepted");
        next.ok();
    });
    {
        let ran = ran.clone();
        root.get("/x", move |_req, res, next| {
            *ran.borrow_mut() = true;
            res.send("route");
            next.ok();
        });
    }
    let h = Harness::new(root);
    h.push(b"GET /x HTTP/1.1\r\nHost: t\r\n\r\n");
    let (_, body) = split_response(&h.take_output());
    assert_eq!(body, b"intercepted");
    assert!(!*ran.borrow());
}

#[test]
fn keep_alive_decision_matrix() {
    let build = || {
        let root = Router::new("/");
        root.get("/x", |_req, res, next| {
            res.send("ok");
            next.ok();
        });
        root
    };

    // HTTP/1.0 defaults to close
    let h = Harness::new(build());
    h.push(b"GET /x HTTP/1.0\r\nHost: t\r\n\r\n");
    assert!(h.output_string().contains("Connection: close"));
    assert!(h.closed());

    // HTTP/1.0 with keep-alive stays open (case-insensitive)
    let h = Harness::new(build());
    h.push(b"GET /x HTTP/1.0\r\nHost: t\r\nConnection: Keep-Alive\r\n\r\n");
    assert!(h.output_string().contains("Connection: keep-alive"));
    assert!(!h.closed());

    // HTTP/1.1 defaults to keep-alive
    let h = Harness::new(build());
    h.push(b"GET /x HTTP/1.1\r\nHost: t\r\n\r\n");
    assert!(!h.closed());

    // HTTP/1.1 with close closes
    let h = Harness::new(build());
    h.push(b"GET /x HTTP/1.1\r\nHost: t\r\nConnection: CLOSE\r\n\r\n");
    assert!(h.closed());
}

#[test]
fn pipelined_requests_are_served_in_order() {
    let root = Router::new("/");
    root.get("/a", |_req, res, next| {
        res.send("alpha");
        next.ok();
    });
    root.get("/b", |_req, res, next| {
        res.send("beta");
        next.ok();
    });
    let h = Harness::new(root);
    h.push(
        b"GET /a HTTP/1.1\r\nHost: t\r\n\r\n\
          GET /b HTTP/1.1\r\nHost: t\r\n\r\n",
    );
    let out = h.output_string();
    let alpha = out.find("alpha").expect("first response missing");
    let beta = out.find("beta").expect("second response missing");
    assert!(alpha < beta);
    assert_eq!(out.matches("HTTP/1.1 200").count(), 2);
}

#[test]
fn parse_error_responds_400_and_closes() {
    let root = Router::new("/");
    root.get("/x", |_req, res, next| {
        res.send("ok");
        next.ok();
    });
    let h = Harness::new(root);
    h.push(b"GET /x TOTALLY-NOT-HTTP\r\nHost t\r\n\r\n");
    let out = h.output_string();
    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", out);
    assert!(out.contains("Connection: close"));
    assert!(h.closed());
}

#[test]
fn empty_body_keeps_content_length_zero() {
    let root = Router::new("/");
    root.get("/nothing", |_req, res, next| {
        res.send("");
        next.ok();
    });
    let h = Harness::new(root);
    h.push(b"GET /nothing HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, body) = split_response(&h.take_output());
    assert!(head.contains("Content-Length: 0"));
    assert!(!head.contains("Transfer-Encoding"));
    assert!(body.is_empty());
}

#[test]
fn redirect_sets_location_with_whitelisted_status() {
    let root = Router::new("/");
    root.get("/old", |_req, res, next| {
        res.redirect("/new", None).unwrap();
        next.ok();
    });
    root.get("/bad", |_req, res, next| {
        let err = res.redirect("/new", Some(200)).unwrap_err();
        next.fail(err);
    });

    let h = Harness::new(root.clone());
    h.push(b"GET /old HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, _) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 302 Found\r\n"));
    assert!(head.contains("Location: /new"));

    let h = Harness::new(root);
    h.push(b"GET /bad HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, _) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 500"));
}

#[test]
fn cookies_round_trip() {
    let root = Router::new("/");
    root.get("/c", |req, res, next| {
        let theme = req.cookie("theme").unwrap_or("none").to_string();
        res.cookies().set(
            Cookie::new("sid", "abc123").path("/").http_only(),
        );
        res.send(theme);
        next.ok();
    });
    let h = Harness::new(root);
    h.push(
        b"GET /c HTTP/1.1\r\nHost: t\r\n\
          Cookie: theme=dark; lang=en\r\n\r\n",
    );
    let (head, body) = split_response(&h.take_output());
    assert!(head.contains("Set-Cookie: sid=abc123; Path=/; HttpOnly"));
    assert_eq!(body, b"dark");
}

#[test]
fn json_and_jsonp_bodies() {
    let root = Router::new("/");
    root.get("/j", |_req, res, next| {
        res.json(&serde_json::json!({"ok": true}));
        next.ok();
    });
    root.get("/jp", |_req, res, next| {
        res.jsonp(&serde_json::json!("line\u{2028}break"));
        next.ok();
    });

    let h = Harness::new(root.clone());
    h.push(b"GET /j HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, body) = split_response(&h.take_output());
    assert!(head.contains("Content-Type: application/json"));
    assert_eq!(body, br#"{"ok":true}"#);

    let h = Harness::new(root);
    h.push(b"GET /jp HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, body) = split_response(&h.take_output());
    assert!(head.contains("Content-Type: text/javascript"));
    assert!(head.contains("X-Content-Type-Options: nosniff"));
    let body = String::from_utf8_lossy(&body).into_owned();
    assert!(body.starts_with(
        "/**/ typeof callback === 'function' && callback("
    ));
    assert!(body.contains("\\u2028"));
    assert!(!body.contains('\u{2028}'));
}

#[test]
fn server_sent_events_stream_as_chunks() {
    let root = Router::new("/");
    root.get("/events", |_req, res, next| {
        res.send_event("greeting", "hello\nworld", "1");
        res.send_event_message("plain");
        res.send_event_comment("ping");
        res.end();
        next.ok();
    });
    let h = Harness::new(root);
    h.push(b"GET /events HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, body) = split_response(&h.take_output());
    assert!(head.contains("Content-Type: text/event-stream"));
    assert!(head.contains("Transfer-Encoding: chunked"));
    let events = String::from_utf8(dechunk(&body)).unwrap();
    assert_eq!(
        events,
        "event: greeting\ndata: hello\ndata: world\nid: 1\n\n\
         data: plain\n\n\
         : ping\n\n"
    );
}

#[test]
fn paused_dispatch_defers_everything_until_resume() {
    type Parked = Rc<RefCell<Option<(FilterRuleCtx, PolicyCb)>>>;
    let parked: Parked = Rc::new(RefCell::new(None));
    let root = Router::new("/");
    {
        let parked = parked.clone();
        let first = Cell::new(true);
        root.register_policy(FilterPolicy::access(move |ctx, cb| {
            if first.get() {
                first.set(false);
                ctx.res.as_ref().unwrap().pause();
                *parked.borrow_mut() = Some((ctx, cb));
            } else {
                cb.pass();
            }
        }));
    }
    root.post("/forms/login", |_req, res, next| {
        res.send("logged in");
        next.ok();
    });

    let h = Harness::new(root);
    h.push(
        b"POST /forms/login HTTP/1.1\r\nHost: t\r\n\
          Content-Length: 0\r\n\r\n",
    );
    assert!(h.output_string().is_empty(), "response before resume");
    assert!(!h.closed());

    // bytes arriving while paused must not advance the parser
    h.push(
        b"POST /forms/login HTTP/1.1\r\nHost: t\r\n\
          Content-Length: 0\r\n\r\n",
    );
    assert!(h.output_string().is_empty(), "parser advanced while paused");

    // the policy calls back later, e.g. from a reactor timer
    let (ctx, cb) = parked.borrow_mut().take().unwrap();
    ctx.res.as_ref().unwrap().resume();
    h.drive();
    cb.pass();
    h.drive();

    let out = h.output_string();
    assert_eq!(out.matches("logged in").count(), 2,
               "both requests answered after resume: {}", out);
}
