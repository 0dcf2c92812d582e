//! The preprocessing lexer, together with the text filters that run before it
//! (trigraph replacement, line splicing, comment stripping).

pub mod lexer;
pub mod phases;
pub mod token;
