mod common;
mod oracle;
