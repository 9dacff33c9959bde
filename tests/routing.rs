//! Router tree resolution against the public registration DSL.

extern crate emvc;

use std::rc::Rc;

use emvc::{Method, Router};

fn noop(router: &Rc<Router>, method: Method, path: &str) {
    router.register_route_handler(
        method,
        path,
        Rc::new(|_req, _res, next| next.ok()),
        None,
    );
}

#[test]
fn resolves_params_on_the_root_router() {
    let root = Router::new("/");
    noop(&root, Method::Get, "/echo/:val");

    let m = root.resolve_url(Method::Get, "/echo/hello").unwrap();
    assert_eq!(m.route().unwrap().path(), "/echo/:val");
    assert_eq!(m.params().get("val"), Some("hello"));

    assert!(root.resolve_url(Method::Post, "/echo/hello").is_none());
    assert!(root.resolve_url(Method::Get, "/nope").is_none());
}

#[test]
fn first_registered_route_wins() {
    let root = Router::new("/");
    noop(&root, Method::Get, "/item/:id");
    noop(&root, Method::Get, "/item/special");

    let m = root.resolve_url(Method::Get, "/item/special").unwrap();
    assert_eq!(m.route().unwrap().path(), "/item/:id");
}

#[test]
fn all_pseudo_verb_is_the_fallback() {
    let root = Router::new("/");
    noop(&root, Method::All, "/anything");
    noop(&root, Method::Get, "/anything/specific");

    let m = root.resolve_url(Method::Post, "/anything").unwrap();
    assert_eq!(m.route().unwrap().path(), "/anything");
    let m = root.resolve_url(Method::Delete, "/anything").unwrap();
    assert_eq!(m.route().unwrap().path(), "/anything");
}

#[test]
fn child_routers_resolve_before_own_routes() {
    let root = Router::new("/");
    let blog = Router::new("/blog");
    noop(&blog, Method::Get, "/posts/:id");
    root.register_router(blog);
    noop(&root, Method::Get, "/blog-archive");

    let m = root.resolve_url(Method::Get, "/blog/posts/42").unwrap();
    assert_eq!(m.route().unwrap().path(), "/posts/:id");
    assert_eq!(m.params().get("id"), Some("42"));

    let m = root.resolve_url(Method::Get, "/blog-archive").unwrap();
    assert_eq!(m.route().unwrap().path(), "/blog-archive");
}

#[test]
fn longer_child_paths_win_over_shorter_ones() {
    let root = Router::new("/");
    let api = Router::new("/api");
    noop(&api, Method::Get, "/status");
    let api_v2 = Router::new("/api/v2");
    noop(&api_v2, Method::Get, "/status");
    // register the short prefix first; the long one must still win
    root.register_router(api.clone());
    root.register_router(api_v2.clone());

    let m = root.resolve_url(Method::Get, "/api/v2/status").unwrap();
    assert_eq!(
        m.route().unwrap().router().unwrap().path(),
        "/api/v2/"
    );
    let m = root.resolve_url(Method::Get, "/api/status").unwrap();
    assert_eq!(m.route().unwrap().router().unwrap().path(), "/api/");
}

#[test]
fn router_index_serves_the_bare_mount() {
    let root = Router::new("/");
    let docs = Router::new("/docs");
    docs.router_index("home");
    noop(&docs, Method::Get, "/home");
    root.register_router(docs);

    let m = root.resolve_url(Method::Get, "/docs/").unwrap();
    assert_eq!(m.route().unwrap().path(), "/home");
}

#[test]
fn reparenting_detaches_from_the_old_parent() {
    let old_root = Router::new("/");
    let new_root = Router::new("/");
    let admin = Router::new("/admin");
    noop(&admin, Method::Get, "/users");

    old_root.register_router(admin.clone());
    assert!(old_root.resolve_url(Method::Get, "/admin/users").is_some());

    new_root.register_router(admin.clone());
    assert!(old_root.resolve_url(Method::Get, "/admin/users").is_none());
    assert!(new_root.resolve_url(Method::Get, "/admin/users").is_some());
    assert_eq!(admin.full_path(), "/admin/");
}

#[test]
fn paths_are_normalized() {
    let root = Router::new("/");
    let weird = Router::new("a//b");
    noop(&weird, Method::Get, "/x");
    root.register_router(weird.clone());

    assert_eq!(weird.path(), "/a/b/");
    assert!(root.resolve_url(Method::Get, "/a/b/x").is_some());
}

#[test]
#[should_panic(expected = "root path")]
fn mounting_a_root_router_panics() {
    let root = Router::new("/");
    root.register_router(Router::new("/"));
}
