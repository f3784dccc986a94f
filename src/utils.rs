use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Добавляет схему протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(url: &str, is_turn: bool) -> String {
    // Если url уже начинается с известной схемы, возвращаем как есть
    if ["turn:", "turns:", "stun:", "stuns:"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
    {
        url.to_string()
    } else {
        // TURN сервер узнаём по наличию учётных данных
        let scheme = if is_turn { "turn:" } else { "stun:" };
        format!("{}{}", scheme, url)
    }
}
