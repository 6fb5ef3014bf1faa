use glidelink::DriverRegistry;

pub(crate) fn handle_drivers() {
    let registry = DriverRegistry::default();
    for entry in registry.entries() {
        let flags: Vec<&str> = entry.flags.iter_names().map(|(name, _)| name).collect();
        println!("{:<10} {:<16} {}", entry.name, entry.display_name, flags.join(" "));
    }
}
