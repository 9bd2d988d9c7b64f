use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::interner::{Interner, Symbol};
use crate::token::Token;

/// Global mostly read-only state that can persist across interpreter sessions.
///
/// Anchors the string interner and maps keyword spellings to their tokens.
/// Scanner, parser, and evaluator all hold a reference to the same context so
/// that symbols interned in one stage compare equal in the others.
#[derive(Debug)]
pub struct Context {
    interner: RefCell<Interner>,
    keywords: HashMap<Symbol, Token>,
    self_sym: Symbol,
}

impl Context {
    /// Creates a new context.
    ///
    /// Returns an Rc because the context is shared between various data
    /// structures.
    pub fn new() -> Rc<Self> {
        let mut interner = Interner::new();

        let mut keywords = HashMap::new();
        for (name, token) in KEYWORDS.iter().cloned() {
            keywords.insert(interner.intern(name), token);
        }
        let self_sym = interner.intern("self");

        Rc::new(Context {
            interner: RefCell::new(interner),
            keywords,
            self_sym,
        })
    }

    /// Interns the given name if needed and returns its symbol.
    pub fn symbol(&self, name: &str) -> Symbol {
        self.interner.borrow_mut().intern(name)
    }

    /// Returns the token associated with the given symbol if it is a keyword.
    pub fn keyword(&self, sym: &Symbol) -> Option<Token> {
        self.keywords.get(sym).cloned()
    }

    /// The implicit receiver parameter bound by method definitions.
    pub fn self_symbol(&self) -> Symbol {
        self.self_sym.clone()
    }
}

const KEYWORDS: [(&str, Token); 21] = [
    ("and", Token::And),
    ("break", Token::Break),
    ("do", Token::Do),
    ("else", Token::Else),
    ("elseif", Token::Elseif),
    ("end", Token::End),
    ("false", Token::False),
    ("for", Token::For),
    ("function", Token::Function),
    ("if", Token::If),
    ("in", Token::In),
    ("local", Token::Local),
    ("nil", Token::Nil),
    ("not", Token::Not),
    ("or", Token::Or),
    ("repeat", Token::Repeat),
    ("return", Token::Return),
    ("then", Token::Then),
    ("true", Token::True),
    ("until", Token::Until),
    ("while", Token::While),
];
