use std::convert::Infallible;
use std::sync::Arc;
use tera::{Context, Tera};
use warp::reply::Reply;

pub async fn folder(
    root: String,
    tera: Arc<Tera>,
    path: String,
    elements: (Vec<String>, Vec<String>),
) -> Result<impl Reply, Infallible> {
    let (folders, paths) = elements;

    let mut ctx = Context::new();
    ctx.insert("root", &root);
    ctx.insert("path", &path);
    ctx.insert("folders", &folders);
    ctx.insert("paths", &paths);

    match tera.render("catalog.html.tera", &ctx) {
        Ok(html) => Ok(warp::reply::html(html)),
        Err(e) => Ok(warp::reply::html(format!("template error: {}", e))),
    }
}
