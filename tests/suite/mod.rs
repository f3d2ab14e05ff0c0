#[cfg(unix)]
mod pipeline;
