//! Canon of books a conversation can be scoped to

use serde::Serialize;

/// Old or New Testament
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Testament {
    /// Antigo Testamento
    Old,
    /// Novo Testamento
    New,
}

/// A book of the Bible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Book {
    /// URL-safe identifier stored on sessions
    pub slug: &'static str,
    /// Display name
    pub name: &'static str,
    /// Which testament it belongs to
    pub testament: Testament,
}

const fn ot(slug: &'static str, name: &'static str) -> Book {
    Book {
        slug,
        name,
        testament: Testament::Old,
    }
}

const fn nt(slug: &'static str, name: &'static str) -> Book {
    Book {
        slug,
        name,
        testament: Testament::New,
    }
}

/// All 66 books in canonical order
pub const BOOKS: &[Book] = &[
    ot("genesis", "Gênesis"),
    ot("exodo", "Êxodo"),
    ot("levitico", "Levítico"),
    ot("numeros", "Números"),
    ot("deuteronomio", "Deuteronômio"),
    ot("josue", "Josué"),
    ot("juizes", "Juízes"),
    ot("rute", "Rute"),
    ot("1-samuel", "1 Samuel"),
    ot("2-samuel", "2 Samuel"),
    ot("1-reis", "1 Reis"),
    ot("2-reis", "2 Reis"),
    ot("1-cronicas", "1 Crônicas"),
    ot("2-cronicas", "2 Crônicas"),
    ot("esdras", "Esdras"),
    ot("neemias", "Neemias"),
    ot("ester", "Ester"),
    ot("jo", "Jó"),
    ot("salmos", "Salmos"),
    ot("proverbios", "Provérbios"),
    ot("eclesiastes", "Eclesiastes"),
    ot("cantares", "Cânticos"),
    ot("isaias", "Isaías"),
    ot("jeremias", "Jeremias"),
    ot("lamentacoes", "Lamentações"),
    ot("ezequiel", "Ezequiel"),
    ot("daniel", "Daniel"),
    ot("oseias", "Oseias"),
    ot("joel", "Joel"),
    ot("amos", "Amós"),
    ot("obadias", "Obadias"),
    ot("jonas", "Jonas"),
    ot("miqueias", "Miqueias"),
    ot("naum", "Naum"),
    ot("habacuque", "Habacuque"),
    ot("sofonias", "Sofonias"),
    ot("ageu", "Ageu"),
    ot("zacarias", "Zacarias"),
    ot("malaquias", "Malaquias"),
    nt("mateus", "Mateus"),
    nt("marcos", "Marcos"),
    nt("lucas", "Lucas"),
    nt("joao", "João"),
    nt("atos", "Atos"),
    nt("romanos", "Romanos"),
    nt("1-corintios", "1 Coríntios"),
    nt("2-corintios", "2 Coríntios"),
    nt("galatas", "Gálatas"),
    nt("efesios", "Efésios"),
    nt("filipenses", "Filipenses"),
    nt("colossenses", "Colossenses"),
    nt("1-tessalonicenses", "1 Tessalonicenses"),
    nt("2-tessalonicenses", "2 Tessalonicenses"),
    nt("1-timoteo", "1 Timóteo"),
    nt("2-timoteo", "2 Timóteo"),
    nt("tito", "Tito"),
    nt("filemom", "Filemom"),
    nt("hebreus", "Hebreus"),
    nt("tiago", "Tiago"),
    nt("1-pedro", "1 Pedro"),
    nt("2-pedro", "2 Pedro"),
    nt("1-joao", "1 João"),
    nt("2-joao", "2 João"),
    nt("3-joao", "3 João"),
    nt("judas", "Judas"),
    nt("apocalipse", "Apocalipse"),
];

/// Look up a book by slug (case-insensitive)
pub fn find_book(slug: &str) -> Option<&'static Book> {
    let slug = slug.trim();
    BOOKS.iter().find(|b| b.slug.eq_ignore_ascii_case(slug))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_canon_size_and_split() {
        assert_eq!(BOOKS.len(), 66);
        let old = BOOKS
            .iter()
            .filter(|b| b.testament == Testament::Old)
            .count();
        assert_eq!(old, 39);
    }

    #[test]
    fn test_slugs_are_unique() {
        let slugs: HashSet<_> = BOOKS.iter().map(|b| b.slug).collect();
        assert_eq!(slugs.len(), BOOKS.len());
    }

    #[test]
    fn test_find_book() {
        assert_eq!(find_book("Genesis").map(|b| b.name), Some("Gênesis"));
        assert_eq!(find_book(" apocalipse ").map(|b| b.testament), Some(Testament::New));
        assert!(find_book("enoque").is_none());
    }
}
